//! Axum glue: error responses and request extractors.

pub mod auth;
pub mod error;

pub use auth::{
    BearerAuth, BearerRejection, ClientMeta, DPOP_HEADER, OptionalBearerAuth, basic_credentials,
    dpop_proof,
};
pub use error::{OAuthErrorBody, invalid_token_response, no_store_headers};
