//! HTTP routes for the party service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::identity::IdentityProvider;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::service::PartyService;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PartyService>,

    /// Resolves bearer tokens, for the auth middleware and the socket route.
    pub identity: Arc<dyn IdentityProvider>,

    pub config: Config,
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public, unversioned
/// - `/v1/rooms/...` - REST operations, bearer token required
/// - `/v1/rooms/{room_id}/ws` - push channel, token in the query string
///
/// Every route is wrapped in tracing, the configured request timeout and
/// HTTP metrics.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        identity: Arc::clone(&state.identity),
    });
    let request_timeout = state.config.request_timeout;

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Authenticates from the query string itself.
        .route("/v1/rooms/:room_id/ws", get(handlers::room_socket))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route(
            "/v1/rooms",
            post(handlers::create_room).get(handlers::list_rooms),
        )
        .route(
            "/v1/rooms/:room_id",
            get(handlers::get_room).delete(handlers::delete_room),
        )
        .route("/v1/rooms/:room_id/join", post(handlers::join_room))
        .route("/v1/rooms/:room_id/leave", post(handlers::leave_room))
        .route("/v1/rooms/:room_id/sync", put(handlers::update_sync))
        .route("/v1/rooms/:room_id/messages", get(handlers::list_messages))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TraceLayer (innermost)
    // 2. TimeoutLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
