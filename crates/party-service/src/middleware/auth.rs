//! Authentication middleware for `/v1` routes.
//!
//! Extracts the Bearer token from the Authorization header, resolves it
//! through the identity collaborator and stores the caller's
//! [`UserProfile`] in request extensions.

use crate::errors::PartyError;
use crate::identity::{IdentityProvider, UserProfile};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use common::secret::SecretString;
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub identity: Arc<dyn IdentityProvider>,
}

/// Bearer token from the Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<SecretString, PartyError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "party.middleware.auth", "Missing Authorization header");
            PartyError::Unauthorized("Missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "party.middleware.auth", "Invalid Authorization header format");
        PartyError::Unauthorized("Invalid Authorization header format".to_string())
    })?;

    if token.trim().is_empty() {
        return Err(PartyError::Unauthorized(
            "Invalid Authorization header format".to_string(),
        ));
    }
    Ok(SecretString::from(token.trim().to_string()))
}

/// Resolve the caller and continue with their profile in extensions.
///
/// Returns 401 when the token is missing or the identity service rejects it.
#[instrument(skip_all, name = "party.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, PartyError> {
    let token = extract_bearer_token(req.headers())?;
    let profile: UserProfile = state.identity.authenticate(&token).await?;

    req.extensions_mut().insert(profile);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentityProvider;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use common::secret::ExposeSecret;
    use common::types::UserId;
    use tower::ServiceExt;

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(PartyError::Unauthorized(_))
        ));

        headers.insert("authorization", "Basic dXNlcjpwdw==".parse().unwrap());
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(PartyError::Unauthorized(_))
        ));

        headers.insert("authorization", "Bearer tok-1".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap().expose_secret(), "tok-1");
    }

    async fn whoami(Extension(profile): Extension<UserProfile>) -> String {
        profile.name
    }

    fn app() -> Router {
        let identity = StaticIdentityProvider::new().with_user(
            "tok-alice",
            UserProfile {
                user_id: UserId::new(),
                name: "Alice".to_string(),
                avatar_url: None,
            },
        );
        let auth_state = Arc::new(AuthState {
            identity: Arc::new(identity),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    #[tokio::test]
    async fn test_require_auth_injects_profile() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("authorization", "Bearer tok-alice")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_require_auth_rejects_unknown_token() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("authorization", "Bearer tok-mallory")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }
}
