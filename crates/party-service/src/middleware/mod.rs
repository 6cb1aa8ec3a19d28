//! HTTP middleware for the party service.
//!
//! - `auth` - Bearer token resolution for `/v1` routes
//! - `http_metrics` - request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{extract_bearer_token, require_auth, AuthState};
pub use http_metrics::http_metrics_middleware;
