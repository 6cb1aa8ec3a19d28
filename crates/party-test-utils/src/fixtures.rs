//! Test fixtures: users, videos and request bodies.

use common::types::UserId;
use party_service::catalog::{StaticVideoCatalog, VideoInfo};
use party_service::identity::{StaticIdentityProvider, UserProfile};
use party_service::models::{CreateRoomRequest, SyncRequest};

/// Video every fixture catalog knows.
pub const TEST_VIDEO_REF: &str = "big-buck-bunny";
pub const TEST_VIDEO_TITLE: &str = "Big Buck Bunny";

/// Named users registered in every fixture identity provider.
pub const TEST_USER_NAMES: &[&str] = &["Hana", "Alex", "Blair", "Casey", "Drew", "Ellis"];

/// Extra anonymous users (`user-0` .. `user-31`) for concurrency tests.
pub const GENERATED_USER_COUNT: usize = 32;

/// Bearer token for a fixture user.
pub fn token_for(name: &str) -> String {
    format!("tok-{}", name.to_lowercase())
}

pub fn profile(name: &str) -> UserProfile {
    UserProfile {
        user_id: UserId::new(),
        name: name.to_string(),
        avatar_url: Some(format!("https://avatars.test/{}.png", name.to_lowercase())),
    }
}

/// Every fixture user: the named ones, then the generated ones.
pub fn test_users() -> Vec<UserProfile> {
    TEST_USER_NAMES
        .iter()
        .map(|name| profile(name))
        .chain((0..GENERATED_USER_COUNT).map(|i| profile(&format!("user-{i}"))))
        .collect()
}

pub fn identity_for(users: &[UserProfile]) -> StaticIdentityProvider {
    users.iter().fold(StaticIdentityProvider::new(), |identity, user| {
        identity.with_user(token_for(&user.name), user.clone())
    })
}

pub fn test_video() -> VideoInfo {
    VideoInfo {
        id: TEST_VIDEO_REF.to_string(),
        title: TEST_VIDEO_TITLE.to_string(),
        duration_seconds: 596.0,
    }
}

pub fn test_catalog() -> StaticVideoCatalog {
    StaticVideoCatalog::new().with_video(test_video())
}

pub fn create_request(name: &str, max_participants: u32) -> CreateRoomRequest {
    CreateRoomRequest {
        name: name.to_string(),
        description: Some("Fixture room".to_string()),
        video_ref: TEST_VIDEO_REF.to_string(),
        max_participants: Some(max_participants),
    }
}

pub fn sync_request(current_time: f64, is_paused: bool) -> SyncRequest {
    SyncRequest {
        current_time,
        is_paused,
        seq: None,
    }
}
