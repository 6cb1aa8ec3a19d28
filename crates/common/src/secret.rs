//! Secret wrappers for credentials that must never reach the logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace uses the same types for
//! the database URL and caller bearer tokens. `SecretString` implements `Debug`
//! with redaction, so a struct deriving `Debug` stays safe to trace.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     database_url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     database_url: SecretString::from("postgresql://party:hunter2@db/party"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! assert!(settings.database_url.expose_secret().starts_with("postgresql://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
