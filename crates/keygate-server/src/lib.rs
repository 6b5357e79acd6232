//! # keygate-server
//!
//! The Keygate authorization server: configuration loading, logging
//! bootstrap, storage backend wiring and the HTTP server.

pub mod config;
pub mod observability;
pub mod server;
pub mod state;

pub use config::{AppConfig, ConfigLoadError, load_config};
pub use server::{KeygateServer, ServerBuilder, build_app};
pub use state::build_services;
