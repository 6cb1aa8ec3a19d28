//! Party service error types.
//!
//! Every operation returns a [`PartyError`] carrying a kind and a message. The
//! `IntoResponse` impl maps kinds onto HTTP status codes; messages for store,
//! catalog and internal failures are replaced with generic text before they
//! reach a client while the real cause is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Party service error type.
///
/// Maps to HTTP status codes:
/// - BadRequest: 400
/// - Unauthorized: 401
/// - Forbidden: 403
/// - NotFound: 404
/// - Conflict: 409
/// - Store, Catalog, Internal: 500 / 502 / 500
/// - ServiceUnavailable: 503
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartyError {
    /// Room, participant or video absent, or the room already ENDED.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Capacity exceeded, duplicate active membership, or a superseded sync.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A non-host attempted a host-only mutation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Caller identity could not be resolved.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Durable store failure. Treated as transient by the retry path.
    #[error("Store error: {0}")]
    Store(String),

    /// Video catalog or identity collaborator failure (not a missing record).
    #[error("Collaborator error: {0}")]
    Catalog(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PartyError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            PartyError::BadRequest(_) => 400,
            PartyError::Unauthorized(_) => 401,
            PartyError::Forbidden(_) => 403,
            PartyError::NotFound(_) => 404,
            PartyError::Conflict(_) => 409,
            PartyError::Catalog(_) => 502,
            PartyError::ServiceUnavailable(_) => 503,
            PartyError::Store(_) | PartyError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code, also used as a metrics label.
    pub fn error_code(&self) -> &'static str {
        match self {
            PartyError::NotFound(_) => "NOT_FOUND",
            PartyError::Conflict(_) => "CONFLICT",
            PartyError::Forbidden(_) => "FORBIDDEN",
            PartyError::BadRequest(_) => "BAD_REQUEST",
            PartyError::Unauthorized(_) => "UNAUTHORIZED",
            PartyError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            PartyError::Store(_) => "STORE_ERROR",
            PartyError::Catalog(_) => "UPSTREAM_ERROR",
            PartyError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message that is safe to hand to a client.
    pub fn client_message(&self) -> String {
        match self {
            PartyError::NotFound(msg)
            | PartyError::Conflict(msg)
            | PartyError::Forbidden(msg)
            | PartyError::BadRequest(msg)
            | PartyError::Unauthorized(msg) => msg.clone(),
            PartyError::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            PartyError::Store(_) => "An internal storage error occurred".to_string(),
            PartyError::Catalog(_) => "An upstream service failed".to_string(),
            PartyError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether the one-shot retry on host promotion or termination applies.
    pub fn is_transient(&self) -> bool {
        matches!(self, PartyError::Store(_))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for PartyError {
    fn into_response(self) -> Response {
        match &self {
            PartyError::Store(err) => {
                tracing::error!(target: "party.store", error = %err, "Store operation failed");
            }
            PartyError::Catalog(err) => {
                tracing::error!(
                    target: "party.collaborator",
                    error = %err,
                    "Collaborator call failed"
                );
            }
            PartyError::Internal(err) => {
                tracing::error!(target: "party.internal", error = %err, "Internal error");
            }
            PartyError::ServiceUnavailable(reason) => {
                tracing::warn!(
                    target: "party.availability",
                    reason = %reason,
                    "Service unavailable"
                );
            }
            _ => {}
        }

        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"watch-party\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to PartyError.
///
/// Unique violations surface as `Conflict`; the store layer relies on the
/// `(room_id, user_id)` constraint as a backstop for duplicate membership.
impl From<sqlx::Error> for PartyError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return PartyError::Conflict("User is already a member of this room".to_string());
            }
        }
        PartyError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for PartyError {
    fn from(err: reqwest::Error) -> Self {
        PartyError::Catalog(err.to_string())
    }
}
