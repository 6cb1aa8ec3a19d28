//! Party service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default grace period before a lost connection counts as a leave.
pub const DEFAULT_DISCONNECT_GRACE_SECONDS: u64 = 30;

/// Default drain period before an ENDED room's actor is torn down.
pub const DEFAULT_ROOM_DRAIN_SECONDS: u64 = 5;

/// Default bound of each connection's outbound event queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default `maxParticipants` when a create request omits it.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 10;

/// Default upper bound accepted for `maxParticipants`.
pub const DEFAULT_MAX_PARTICIPANTS_LIMIT: u32 = 100;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default drain after SIGTERM before the listener shuts down.
pub const DEFAULT_SHUTDOWN_DRAIN_SECONDS: u64 = 5;

/// Which `RoomStore` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

/// Party service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8090").
    pub bind_address: String,

    /// Store backend (`PARTY_STORE`, default: memory).
    pub store_backend: StoreBackend,

    /// Postgres connection URL, required for the postgres backend.
    pub database_url: Option<SecretString>,

    /// Base URL of the video catalog. `None` uses an empty static catalog.
    pub catalog_url: Option<String>,

    /// Base URL of the identity service. `None` uses an empty static directory.
    pub identity_url: Option<String>,

    pub disconnect_grace_period: Duration,

    pub room_drain_period: Duration,

    pub outbound_queue_capacity: usize,

    pub max_participants_limit: u32,

    pub request_timeout: Duration,

    pub shutdown_drain_period: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("store_backend", &self.store_backend)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("catalog_url", &self.catalog_url)
            .field("identity_url", &self.identity_url)
            .field("disconnect_grace_period", &self.disconnect_grace_period)
            .field("room_drain_period", &self.room_drain_period)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("max_participants_limit", &self.max_participants_limit)
            .field("request_timeout", &self.request_timeout)
            .field("shutdown_drain_period", &self.shutdown_drain_period)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("PARTY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let store_backend = match vars.get("PARTY_STORE").map(String::as_str) {
            None | Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "PARTY_STORE must be 'memory' or 'postgres', got '{other}'"
                )))
            }
        };

        let database_url = vars.get("DATABASE_URL").cloned().map(SecretString::from);
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let catalog_url = non_empty(vars, "PARTY_CATALOG_URL");
        let identity_url = non_empty(vars, "PARTY_IDENTITY_URL");

        let disconnect_grace_period = Duration::from_secs(parse_or(
            vars,
            "PARTY_DISCONNECT_GRACE_SECONDS",
            DEFAULT_DISCONNECT_GRACE_SECONDS,
        )?);

        let room_drain_period = Duration::from_secs(parse_or(
            vars,
            "PARTY_ROOM_DRAIN_SECONDS",
            DEFAULT_ROOM_DRAIN_SECONDS,
        )?);

        let outbound_queue_capacity = parse_or(
            vars,
            "PARTY_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        if outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PARTY_OUTBOUND_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        let max_participants_limit = parse_or(
            vars,
            "PARTY_MAX_PARTICIPANTS_LIMIT",
            DEFAULT_MAX_PARTICIPANTS_LIMIT,
        )?;
        if max_participants_limit < DEFAULT_MAX_PARTICIPANTS {
            return Err(ConfigError::InvalidValue(format!(
                "PARTY_MAX_PARTICIPANTS_LIMIT must be at least {DEFAULT_MAX_PARTICIPANTS}"
            )));
        }

        let request_timeout = Duration::from_secs(parse_or(
            vars,
            "PARTY_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?);

        let shutdown_drain_period = Duration::from_secs(parse_or(
            vars,
            "PARTY_SHUTDOWN_DRAIN_SECONDS",
            DEFAULT_SHUTDOWN_DRAIN_SECONDS,
        )?);

        Ok(Config {
            bind_address,
            store_backend,
            database_url,
            catalog_url,
            identity_url,
            disconnect_grace_period,
            room_drain_period,
            outbound_queue_capacity,
            max_participants_limit,
            request_timeout,
            shutdown_drain_period,
        })
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} has invalid value '{raw}'"))),
    }
}
