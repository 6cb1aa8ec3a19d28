//! Party service models.
//!
//! Durable records (`Room`, `Participant`, `SystemMessage`), the in-memory
//! aggregate a room actor owns, and the JSON views returned to clients.

pub mod events;

use chrono::{DateTime, Utc};
use common::types::{MessageId, ParticipantId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use events::{EventPayload, RoomEvent, RoomEventKind, SyncDelta};

/// Maximum room name length, in characters.
pub const MAX_ROOM_NAME_LENGTH: usize = 100;

/// Maximum room description length, in characters.
pub const MAX_ROOM_DESCRIPTION_LENGTH: usize = 500;

/// Maximum video reference length.
pub const MAX_VIDEO_REF_LENGTH: usize = 200;

/// Room lifecycle status.
///
/// `Active` and `Paused` flip on host sync; `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Active,
    Paused,
    Ended,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "ACTIVE",
            RoomStatus::Paused => "PAUSED",
            RoomStatus::Ended => "ENDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomStatus::Ended)
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(RoomStatus::Active),
            "PAUSED" => Ok(RoomStatus::Paused),
            "ENDED" => Ok(RoomStatus::Ended),
            other => Err(format!("unknown room status '{other}'")),
        }
    }
}

/// Audit message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    System,
    VideoEvent,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "SYSTEM",
            MessageKind::VideoEvent => "VIDEO_EVENT",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(MessageKind::System),
            "VIDEO_EVENT" => Ok(MessageKind::VideoEvent),
            other => Err(format!("unknown message kind '{other}'")),
        }
    }
}

/// Room record.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    /// Opaque id into the video catalog.
    pub video_ref: String,
    /// Catalog title captured at creation.
    pub video_title: Option<String>,
    pub host_id: UserId,
    pub max_participants: u32,
    pub status: RoomStatus,
    /// Seconds, always >= 0.
    pub current_time: f64,
    pub is_paused: bool,
    /// Soft-delete flag. False once the room has ENDED.
    pub is_active: bool,
    /// Incremented on every applied sync.
    pub sync_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership row. One per `(room_id, user_id)`; rejoins reactivate it.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Profile snapshot taken at join time.
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// Append-only audit-trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub text: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl SystemMessage {
    pub fn system(
        room_id: RoomId,
        user_id: UserId,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            room_id,
            user_id,
            text: text.into(),
            kind: MessageKind::System,
            metadata: None,
            created_at: now,
        }
    }

    pub fn video_event(
        room_id: RoomId,
        user_id: UserId,
        text: impl Into<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            room_id,
            user_id,
            text: text.into(),
            kind: MessageKind::VideoEvent,
            metadata: Some(metadata),
            created_at: now,
        }
    }
}

/// A room together with every participant row it has ever had.
///
/// Owned exclusively by the room actor while one is running.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomAggregate {
    pub room: Room,
    pub participants: Vec<Participant>,
}

impl RoomAggregate {
    /// ACTIVE or PAUSED and not soft-deleted.
    pub fn is_live(&self) -> bool {
        self.room.is_active && !self.room.status.is_terminal()
    }

    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active)
    }

    pub fn active_count(&self) -> usize {
        self.active_participants().count()
    }

    pub fn has_space(&self) -> bool {
        self.active_count() < self.room.max_participants as usize
    }

    /// The active participant flagged as host.
    pub fn host(&self) -> Option<&Participant> {
        self.active_participants().find(|p| p.is_host)
    }

    /// Whether `user_id` is the current host, checked against both the room
    /// record and the participant row.
    pub fn is_current_host(&self, user_id: UserId) -> bool {
        self.room.host_id == user_id && self.host().is_some_and(|p| p.user_id == user_id)
    }

    pub fn active_participant(&self, user_id: UserId) -> Option<&Participant> {
        self.active_participants().find(|p| p.user_id == user_id)
    }

    pub fn to_view(&self) -> RoomView {
        RoomView::from_aggregate(self)
    }
}

/// Participant as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

/// Room as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub video_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
    pub host_id: UserId,
    pub max_participants: u32,
    pub current_participants: u32,
    pub status: RoomStatus,
    pub current_time: f64,
    pub is_paused: bool,
    pub participants: Vec<ParticipantView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomView {
    /// Build a view listing active participants in join order.
    pub fn from_aggregate(aggregate: &RoomAggregate) -> Self {
        let room = &aggregate.room;
        let mut participants: Vec<&Participant> = aggregate.active_participants().collect();
        participants.sort_by_key(|p| (p.joined_at, p.id));

        let participants: Vec<ParticipantView> = participants
            .into_iter()
            .map(|p| ParticipantView {
                id: p.id,
                user_id: p.user_id,
                name: p.display_name.clone(),
                avatar_url: p.avatar_url.clone(),
                is_host: p.is_host,
                joined_at: p.joined_at,
            })
            .collect();

        RoomView {
            id: room.id,
            name: room.name.clone(),
            description: room.description.clone(),
            video_ref: room.video_ref.clone(),
            video_title: room.video_title.clone(),
            host_id: room.host_id,
            max_participants: room.max_participants,
            current_participants: u32::try_from(participants.len()).unwrap_or(u32::MAX),
            status: room.status,
            current_time: room.current_time,
            is_paused: room.is_paused,
            participants,
            created_at: room.created_at,
            updated_at: room.updated_at,
        }
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// Body of `POST /v1/rooms`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub video_ref: String,
    #[serde(default)]
    pub max_participants: Option<u32>,
}

/// Body of `PUT /v1/rooms/:room_id/sync`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub current_time: f64,
    pub is_paused: bool,
    /// Host-side sequence number. Updates at or below the last accepted
    /// value are rejected as superseded.
    #[serde(default)]
    pub seq: Option<u64>,
}

/// Query string of `GET /v1/rooms`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRoomsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<RoomStatus>,
    pub has_space: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRoomsResponse {
    pub rooms: Vec<RoomView>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Query string of `GET /v1/rooms/:room_id/messages`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<SystemMessage>,
}

/// Readiness probe body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub store: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn aggregate() -> RoomAggregate {
        let now = Utc::now();
        let room_id = RoomId::new();
        let host = UserId::new();
        let guest = UserId::new();
        RoomAggregate {
            room: Room {
                id: room_id,
                name: "Movie night".to_string(),
                description: None,
                video_ref: "vid-1".to_string(),
                video_title: Some("Big Buck Bunny".to_string()),
                host_id: host,
                max_participants: 3,
                status: RoomStatus::Active,
                current_time: 0.0,
                is_paused: false,
                is_active: true,
                sync_seq: 0,
                created_at: now,
                updated_at: now,
            },
            participants: vec![
                Participant {
                    id: ParticipantId::new(),
                    room_id,
                    user_id: guest,
                    display_name: "Guest".to_string(),
                    avatar_url: None,
                    is_host: false,
                    is_active: true,
                    joined_at: now + Duration::seconds(5),
                    left_at: None,
                },
                Participant {
                    id: ParticipantId::new(),
                    room_id,
                    user_id: host,
                    display_name: "Host".to_string(),
                    avatar_url: Some("https://cdn/host.png".to_string()),
                    is_host: true,
                    is_active: true,
                    joined_at: now,
                    left_at: None,
                },
                Participant {
                    id: ParticipantId::new(),
                    room_id,
                    user_id: UserId::new(),
                    display_name: "Gone".to_string(),
                    avatar_url: None,
                    is_host: false,
                    is_active: false,
                    joined_at: now,
                    left_at: Some(now),
                },
            ],
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [RoomStatus::Active, RoomStatus::Paused, RoomStatus::Ended] {
            assert_eq!(status.as_str().parse::<RoomStatus>().unwrap(), status);
        }
        assert!("CLOSED".parse::<RoomStatus>().is_err());
    }

    #[test]
    fn test_view_lists_active_participants_in_join_order() {
        let agg = aggregate();
        let view = agg.to_view();

        assert_eq!(view.current_participants, 2);
        assert_eq!(view.participants.len(), 2);
        assert_eq!(view.participants.first().unwrap().name, "Host");
        assert!(view.participants.first().unwrap().is_host);
        assert_eq!(view.participants.get(1).unwrap().name, "Guest");
    }

    #[test]
    fn test_host_checks_use_authoritative_state() {
        let agg = aggregate();
        assert!(agg.is_current_host(agg.room.host_id));

        let guest = agg.participants.first().unwrap().user_id;
        assert!(!agg.is_current_host(guest));
        assert!(agg.has_space());
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let json = serde_json::to_value(aggregate().to_view()).unwrap();
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["videoTitle"], "Big Buck Bunny");
        assert_eq!(json["currentParticipants"], 2);
        assert!(json.get("description").is_none());
        assert!(json["participants"][0]["avatarUrl"].is_string());
    }

    #[test]
    fn test_sync_request_seq_is_optional() {
        let req: SyncRequest =
            serde_json::from_str(r#"{"currentTime": 12.5, "isPaused": true}"#).unwrap();
        assert!(req.seq.is_none());
        assert!(req.is_paused);
    }
}
