//! Server-to-client push events.
//!
//! Every event carries the room id, a per-room event counter (`seq`) and
//! either a full [`RoomView`] or the minimal sync delta. Clients that see a
//! gap in `seq` call `getRoom` to resynchronize.

use super::RoomView;
use common::types::RoomId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomEventKind {
    #[serde(rename = "room.joined")]
    Joined,
    #[serde(rename = "room.left")]
    Left,
    #[serde(rename = "room.hostChanged")]
    HostChanged,
    #[serde(rename = "room.sync")]
    Sync,
    #[serde(rename = "room.ended")]
    Ended,
    /// Sent once to a new subscriber, ahead of any published event. Its
    /// `seq` is the last counter value the room assigned.
    #[serde(rename = "room.snapshot")]
    Snapshot,
}

impl RoomEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomEventKind::Joined => "room.joined",
            RoomEventKind::Left => "room.left",
            RoomEventKind::HostChanged => "room.hostChanged",
            RoomEventKind::Sync => "room.sync",
            RoomEventKind::Ended => "room.ended",
            RoomEventKind::Snapshot => "room.snapshot",
        }
    }
}

/// Playback delta relayed from the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDelta {
    pub current_time: f64,
    pub is_paused: bool,
    /// Server sequence of the applied update.
    pub sync_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Sync(SyncDelta),
    Room(Box<RoomView>),
}

/// One push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub event: RoomEventKind,
    pub room_id: RoomId,
    /// Per-room event counter, assigned at publish time.
    pub seq: u64,
    pub data: EventPayload,
}

impl RoomEvent {
    pub fn with_view(event: RoomEventKind, view: RoomView) -> Self {
        Self {
            event,
            room_id: view.id,
            seq: 0,
            data: EventPayload::Room(Box::new(view)),
        }
    }

    pub fn sync(room_id: RoomId, delta: SyncDelta) -> Self {
        Self {
            event: RoomEventKind::Sync,
            room_id,
            seq: 0,
            data: EventPayload::Sync(delta),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_event_wire_shape() {
        let room_id = RoomId::new();
        let mut event = RoomEvent::sync(
            room_id,
            SyncDelta {
                current_time: 120.0,
                is_paused: true,
                sync_seq: 4,
            },
        );
        event.seq = 9;

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "room.sync");
        assert_eq!(json["roomId"], room_id.to_string());
        assert_eq!(json["seq"], 9);
        assert_eq!(json["data"]["currentTime"], 120.0);
        assert_eq!(json["data"]["isPaused"], true);
        assert_eq!(json["data"]["syncSeq"], 4);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(RoomEventKind::HostChanged.as_str(), "room.hostChanged");
        let json = serde_json::to_string(&RoomEventKind::Ended).unwrap();
        assert_eq!(json, "\"room.ended\"");
    }
}
