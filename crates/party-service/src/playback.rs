//! Authoritative playback position and pause state.
//!
//! The service relays the host's clock; it never advances `currentTime` on its
//! own and allows arbitrary seeks. Host identity is checked against the
//! aggregate at the moment the update is applied.

use crate::errors::PartyError;
use crate::models::{RoomAggregate, RoomEvent, RoomStatus, SyncDelta, SystemMessage};
use crate::transition::{Transition, TransitionBuilder};
use chrono::{DateTime, Utc};
use common::types::UserId;

/// One validated sync update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCommand {
    pub current_time: f64,
    pub is_paused: bool,
    /// Host-side sequence number, if the client sends one.
    pub client_seq: Option<u64>,
}

impl SyncCommand {
    pub fn new(
        current_time: f64,
        is_paused: bool,
        client_seq: Option<u64>,
    ) -> Result<Self, PartyError> {
        if !current_time.is_finite() || current_time < 0.0 {
            return Err(PartyError::BadRequest(
                "currentTime must be a non-negative number of seconds".to_string(),
            ));
        }
        Ok(Self {
            current_time,
            is_paused,
            client_seq,
        })
    }
}

/// Apply `command` on behalf of `user_id`.
///
/// `last_client_seq` is the highest client sequence accepted from the current
/// host; anything at or below it has been superseded.
pub fn apply_sync(
    current: &RoomAggregate,
    user_id: UserId,
    command: SyncCommand,
    last_client_seq: Option<u64>,
    now: DateTime<Utc>,
) -> Result<Transition, PartyError> {
    if !current.is_live() {
        return Err(PartyError::NotFound("Room not found".to_string()));
    }
    if !current.is_current_host(user_id) {
        return Err(PartyError::Forbidden(
            "Only the current host can control playback".to_string(),
        ));
    }
    if let (Some(seq), Some(last)) = (command.client_seq, last_client_seq) {
        if seq <= last {
            return Err(PartyError::Conflict(format!(
                "Sync update {seq} superseded by {last}"
            )));
        }
    }

    let mut builder = TransitionBuilder::new(current.clone());
    let (room_id, sync_seq) = {
        let room = &mut builder.aggregate_mut().room;
        room.current_time = command.current_time;
        room.is_paused = command.is_paused;
        room.status = if command.is_paused {
            RoomStatus::Paused
        } else {
            RoomStatus::Active
        };
        room.sync_seq = room.sync_seq.saturating_add(1);
        room.updated_at = now;
        (room.id, room.sync_seq)
    };

    let verb = if command.is_paused { "paused" } else { "playing" };
    builder.message(SystemMessage::video_event(
        room_id,
        user_id,
        format!("Playback {verb} at {}", format_position(command.current_time)),
        serde_json::json!({
            "currentTime": command.current_time,
            "isPaused": command.is_paused,
            "syncSeq": sync_seq,
        }),
        now,
    ));
    builder.event(RoomEvent::sync(
        room_id,
        SyncDelta {
            current_time: command.current_time,
            is_paused: command.is_paused,
            sync_seq,
        },
    ));

    Ok(builder.finish())
}

/// `h:mm:ss` or `m:ss`.
fn format_position(seconds: f64) -> String {
    // Callers validated `seconds` as finite and non-negative.
    let total = seconds.floor() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::VideoInfo;
    use crate::identity::UserProfile;
    use crate::lifecycle::{create, RoomSettings};
    use crate::membership::{join, leave, LeaveReason};
    use crate::models::{CreateRoomRequest, EventPayload, MessageKind};
    use common::types::RoomId;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            user_id: UserId::new(),
            name: name.to_string(),
            avatar_url: None,
        }
    }

    fn room(host: &UserProfile) -> RoomAggregate {
        let settings = RoomSettings::validate(
            &CreateRoomRequest {
                name: "R".to_string(),
                description: None,
                video_ref: "bbb".to_string(),
                max_participants: Some(4),
            },
            100,
        )
        .unwrap();
        let video = VideoInfo {
            id: "bbb".to_string(),
            title: "Big Buck Bunny".to_string(),
            duration_seconds: 596.0,
        };
        create(RoomId::new(), settings, &video, host, Utc::now()).next
    }

    fn cmd(t: f64, paused: bool) -> SyncCommand {
        SyncCommand::new(t, paused, None).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(SyncCommand::new(0.0, false, None).is_ok());
        assert!(matches!(
            SyncCommand::new(-1.0, false, None),
            Err(PartyError::BadRequest(_))
        ));
        assert!(matches!(
            SyncCommand::new(f64::NAN, true, None),
            Err(PartyError::BadRequest(_))
        ));
        assert!(SyncCommand::new(f64::INFINITY, true, None).is_err());
    }

    #[test]
    fn test_pause_sets_status_and_message() {
        let host = profile("Hana");
        let agg = room(&host);

        let transition =
            apply_sync(&agg, host.user_id, cmd(120.0, true), None, Utc::now()).unwrap();
        let next = &transition.next;
        assert_eq!(next.room.status, RoomStatus::Paused);
        assert!((next.room.current_time - 120.0).abs() < f64::EPSILON);
        assert_eq!(next.room.sync_seq, 1);

        let message = transition.commit.messages.first().unwrap();
        assert_eq!(message.kind, MessageKind::VideoEvent);
        assert_eq!(message.text, "Playback paused at 2:00");
        assert_eq!(message.metadata.as_ref().unwrap()["isPaused"], true);

        let event = transition.events.first().unwrap();
        assert!(matches!(event.data, EventPayload::Sync(d) if d.sync_seq == 1 && d.is_paused));
    }

    #[test]
    fn test_resume_and_seek_backwards() {
        let host = profile("Hana");
        let agg = room(&host);
        let agg = apply_sync(&agg, host.user_id, cmd(300.0, true), None, Utc::now())
            .unwrap()
            .next;
        let agg = apply_sync(&agg, host.user_id, cmd(10.0, false), None, Utc::now())
            .unwrap()
            .next;

        assert_eq!(agg.room.status, RoomStatus::Active);
        assert!((agg.room.current_time - 10.0).abs() < f64::EPSILON);
        assert_eq!(agg.room.sync_seq, 2);
    }

    #[test]
    fn test_non_host_is_forbidden() {
        let host = profile("Hana");
        let alex = profile("Alex");
        let agg = join(&room(&host), &alex, Utc::now()).unwrap().next;

        assert!(matches!(
            apply_sync(&agg, alex.user_id, cmd(1.0, false), None, Utc::now()),
            Err(PartyError::Forbidden(_))
        ));
    }

    #[test]
    fn test_former_host_is_forbidden_after_transfer() {
        let host = profile("Hana");
        let alex = profile("Alex");
        let agg = join(&room(&host), &alex, Utc::now()).unwrap().next;
        let agg = leave(&agg, host.user_id, LeaveReason::Voluntary, Utc::now())
            .unwrap()
            .next;
        let agg = join(&agg, &host, Utc::now()).unwrap().next;

        assert!(matches!(
            apply_sync(&agg, host.user_id, cmd(1.0, false), None, Utc::now()),
            Err(PartyError::Forbidden(_))
        ));
        assert!(apply_sync(&agg, alex.user_id, cmd(1.0, false), None, Utc::now()).is_ok());
    }

    #[test]
    fn test_superseded_client_seq_conflicts() {
        let host = profile("Hana");
        let agg = room(&host);
        let stale = SyncCommand::new(5.0, false, Some(3)).unwrap();

        assert!(matches!(
            apply_sync(&agg, host.user_id, stale, Some(3), Utc::now()),
            Err(PartyError::Conflict(_))
        ));
        assert!(apply_sync(&agg, host.user_id, stale, Some(2), Utc::now()).is_ok());
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0.0), "0:00");
        assert_eq!(format_position(65.9), "1:05");
        assert_eq!(format_position(3723.0), "1:02:03");
    }
}
