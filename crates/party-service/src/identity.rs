//! Identity collaborator.
//!
//! Resolves a caller's bearer token to a user id and the profile snapshot
//! (display name, avatar) shown in room views.

use crate::errors::PartyError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::UserId;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

pub const IDENTITY_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "id")]
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token. Unknown or expired tokens are `Unauthorized`.
    async fn authenticate(&self, token: &SecretString) -> Result<UserProfile, PartyError>;
}

/// Token table held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<String, UserProfile>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, profile: UserProfile) -> Self {
        self.users.insert(token.into(), profile);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &SecretString) -> Result<UserProfile, PartyError> {
        self.users
            .get(token.expose_secret())
            .cloned()
            .ok_or_else(|| PartyError::Unauthorized("Invalid or expired token".to_string()))
    }
}

/// Identity client speaking `GET {base}/v1/users/me`.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    me_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str) -> Result<Self, PartyError> {
        let client = reqwest::Client::builder()
            .timeout(IDENTITY_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PartyError::Internal(format!("failed to build identity client: {e}")))?;

        Ok(Self {
            client,
            me_url: format!("{}/v1/users/me", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all, name = "party.identity.authenticate")]
    async fn authenticate(&self, token: &SecretString) -> Result<UserProfile, PartyError> {
        let response = self
            .client
            .get(&self.me_url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PartyError::Unauthorized(
                "Invalid or expired token".to_string(),
            )),
            status if status.is_success() => Ok(response.json::<UserProfile>().await?),
            status => {
                tracing::warn!(target: "party.identity", %status, "Identity lookup failed");
                Err(PartyError::Catalog(format!("identity service returned {status}")))
            }
        }
    }
}
