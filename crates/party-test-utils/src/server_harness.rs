//! Test harnesses.
//!
//! - [`TestParty`]: the real service wired to in-memory doubles, with the
//!   real router for `oneshot` requests
//! - [`TestPartyServer`]: the same router on a real listener

use crate::faulty_store::FaultyStore;
use crate::fixtures::{identity_for, test_catalog, test_users, token_for};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use party_service::actors::{ActorMetrics, RoomActorSettings, RoomRegistryHandle};
use party_service::config::Config;
use party_service::identity::UserProfile;
use party_service::routes::{self, AppState};
use party_service::service::PartyService;
use party_service::store::RoomStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Actor settings used unless a test picks its own.
pub fn test_actor_settings() -> RoomActorSettings {
    RoomActorSettings {
        grace_period: Duration::from_secs(30),
        drain_period: Duration::from_secs(5),
        queue_capacity: 16,
    }
}

/// The service stack over a [`FaultyStore`], static catalog and static
/// identity provider holding [`test_users`].
pub struct TestParty {
    pub service: Arc<PartyService>,
    pub store: Arc<FaultyStore>,
    pub registry: RoomRegistryHandle,
    pub metrics: Arc<ActorMetrics>,
    users: Vec<UserProfile>,
    state: Arc<AppState>,
}

impl TestParty {
    pub fn new() -> Self {
        Self::with_settings(test_actor_settings())
    }

    pub fn with_settings(settings: RoomActorSettings) -> Self {
        let store = Arc::new(FaultyStore::new());
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            Arc::clone(&store) as Arc<dyn RoomStore>,
            settings,
            Arc::clone(&metrics),
        );

        let config = Config::from_vars(&HashMap::from([(
            "PARTY_BIND_ADDRESS".to_string(),
            "127.0.0.1:0".to_string(),
        )]))
        .expect("test config should load");

        let service = Arc::new(PartyService::new(
            registry.clone(),
            Arc::clone(&store) as Arc<dyn RoomStore>,
            Arc::new(test_catalog()),
            config.max_participants_limit,
        ));

        let users = test_users();
        let state = Arc::new(AppState {
            service: Arc::clone(&service),
            identity: Arc::new(identity_for(&users)),
            config,
        });

        Self {
            service,
            store,
            registry,
            metrics,
            users,
            state,
        }
    }

    /// Fixture user by name (see [`crate::fixtures::TEST_USER_NAMES`]).
    pub fn user(&self, name: &str) -> &UserProfile {
        self.users
            .iter()
            .find(|u| u.name == name)
            .unwrap_or_else(|| panic!("no fixture user named {name}"))
    }

    /// Generated users `user-0` .. `user-{count-1}`.
    pub fn generated_users(&self, count: usize) -> Vec<UserProfile> {
        (0..count)
            .map(|i| self.user(&format!("user-{i}")).clone())
            .collect()
    }

    /// `Authorization` header value for a fixture user.
    pub fn bearer(&self, name: &str) -> String {
        format!("Bearer {}", token_for(name))
    }

    /// The real router over this stack. Metrics render from a local
    /// recorder, so no global recorder is installed.
    pub fn app(&self) -> Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        routes::build_routes(Arc::clone(&self.state), handle)
    }
}

impl Default for TestParty {
    fn default() -> Self {
        Self::new()
    }
}

/// [`TestParty`] served on `127.0.0.1` with a random port.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<(), anyhow::Error> {
///     let server = TestPartyServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestPartyServer {
    addr: SocketAddr,
    party: TestParty,
    _handle: JoinHandle<()>,
}

impl TestPartyServer {
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let party = TestParty::new();
        let app = party.app();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            party,
            _handle: handle,
        })
    }

    pub fn party(&self) -> &TestParty {
        &self.party
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TestPartyServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.party.registry.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_users_are_registered() {
        let party = TestParty::new();
        let hana = party.user("Hana");
        assert_eq!(hana.name, "Hana");
        assert_eq!(party.generated_users(4).len(), 4);
        assert_eq!(party.bearer("Hana"), "Bearer tok-hana");
    }

    #[tokio::test]
    async fn test_server_spawns_on_loopback() {
        let server = TestPartyServer::spawn().await.unwrap();
        assert!(server.addr().ip().is_loopback());
        assert!(server.addr().port() > 0);
        assert_eq!(server.url(), format!("http://{}", server.addr()));
    }
}
