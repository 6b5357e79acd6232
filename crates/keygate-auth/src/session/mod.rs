//! Session resolution and management.
//!
//! A session is either an interactive IDP session or an offline grant seen
//! through one of its refresh tokens. [`resolver`] turns access tokens back
//! into sessions; [`manager`] lists and revokes them.

pub mod manager;
pub mod resolver;

pub use manager::{LogoutOutcome, SessionManager};
pub use resolver::{AccessTokenResolver, extract_access_token};
