use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{Request, Response},
    routing::get,
};
use keygate_auth::{AuthServices, oauth_router};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::config::AppConfig;
use crate::state::build_services;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builds the router: OAuth endpoints, health check and the middleware
/// stack (request id, then tracing, then body limit).
pub fn build_app(cfg: &AppConfig, services: AuthServices) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(oauth_router(services))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &Request<_>| {
                            let request_id = req
                                .headers()
                                .get(REQUEST_ID_HEADER)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("");
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri().path(),
                                http.status_code = tracing::field::Empty,
                                request_id = %request_id
                            )
                        })
                        .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                            span.record("http.status_code", res.status().as_u16());
                            tracing::info!(
                                http.status = res.status().as_u16(),
                                elapsed_ms = latency.as_millis() as u64,
                                "request handled"
                            );
                        }),
                )
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(DefaultBodyLimit::max(cfg.server.body_limit_bytes))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub struct KeygateServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Connects the storage backend and wires the services.
    pub async fn build(self) -> anyhow::Result<KeygateServer> {
        let addr = self.config.addr()?;
        let services = build_services(&self.config).await?;
        Ok(KeygateServer {
            addr,
            app: build_app(&self.config, services),
        })
    }
}

impl KeygateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
