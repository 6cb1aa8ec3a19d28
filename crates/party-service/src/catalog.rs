//! Video catalog collaborator.
//!
//! The catalog owns video metadata. The party service only needs to know that
//! a `videoRef` resolves, and captures its title for room views.

use crate::errors::PartyError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

/// Timeout for a single catalog lookup.
pub const CATALOG_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub duration_seconds: f64,
}

#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Resolve a video reference. Unknown references are `NotFound`.
    async fn resolve(&self, video_ref: &str) -> Result<VideoInfo, PartyError>;
}

/// In-memory catalog, used when no catalog URL is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticVideoCatalog {
    videos: HashMap<String, VideoInfo>,
}

impl StaticVideoCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, video: VideoInfo) -> Self {
        self.videos.insert(video.id.clone(), video);
        self
    }
}

#[async_trait]
impl VideoCatalog for StaticVideoCatalog {
    async fn resolve(&self, video_ref: &str) -> Result<VideoInfo, PartyError> {
        self.videos
            .get(video_ref)
            .cloned()
            .ok_or_else(|| PartyError::NotFound("Video not found".to_string()))
    }
}

/// Catalog client speaking `GET {base}/v1/videos/{ref}`.
#[derive(Debug, Clone)]
pub struct HttpVideoCatalog {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpVideoCatalog {
    pub fn new(base_url: &str) -> Result<Self, PartyError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| PartyError::Internal(format!("invalid catalog url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(CATALOG_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PartyError::Internal(format!("failed to build catalog client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn video_url(&self, video_ref: &str) -> Result<reqwest::Url, PartyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PartyError::Internal("catalog url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v1", "videos", video_ref]);
        Ok(url)
    }
}

#[async_trait]
impl VideoCatalog for HttpVideoCatalog {
    #[instrument(skip(self), name = "party.catalog.resolve")]
    async fn resolve(&self, video_ref: &str) -> Result<VideoInfo, PartyError> {
        let url = self.video_url(video_ref)?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(PartyError::NotFound("Video not found".to_string())),
            status if status.is_success() => Ok(response.json::<VideoInfo>().await?),
            status => {
                tracing::warn!(
                    target: "party.catalog",
                    %status,
                    video_ref,
                    "Catalog lookup failed"
                );
                Err(PartyError::Catalog(format!("catalog returned {status}")))
            }
        }
    }
}
