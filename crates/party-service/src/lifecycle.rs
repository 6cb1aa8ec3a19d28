//! Room creation and termination.
//!
//! A room has two routes to ENDED: explicit deletion by the host and the
//! last active participant leaving (see [`crate::membership`]). Both go through
//! [`terminate`], and both require a live room, so a room is terminated at most
//! once and emits a single `room.ended` event and a single closing message.

use crate::catalog::VideoInfo;
use crate::config::DEFAULT_MAX_PARTICIPANTS;
use crate::errors::PartyError;
use crate::identity::UserProfile;
use crate::models::{
    CreateRoomRequest, Participant, Room, RoomAggregate, RoomEvent, RoomEventKind, RoomStatus,
    SystemMessage, MAX_ROOM_DESCRIPTION_LENGTH, MAX_ROOM_NAME_LENGTH, MAX_VIDEO_REF_LENGTH,
};
use crate::transition::{Transition, TransitionBuilder};
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RoomId, UserId};

/// A create request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSettings {
    pub name: String,
    pub description: Option<String>,
    pub video_ref: String,
    pub max_participants: u32,
}

impl RoomSettings {
    /// Validate a create request against the configured participant limit.
    pub fn validate(
        request: &CreateRoomRequest,
        max_participants_limit: u32,
    ) -> Result<Self, PartyError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(PartyError::BadRequest("Room name is required".to_string()));
        }
        if name.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(PartyError::BadRequest(format!(
                "Room name must be at most {MAX_ROOM_NAME_LENGTH} characters"
            )));
        }

        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if description.is_some_and(|d| d.chars().count() > MAX_ROOM_DESCRIPTION_LENGTH) {
            return Err(PartyError::BadRequest(format!(
                "Description must be at most {MAX_ROOM_DESCRIPTION_LENGTH} characters"
            )));
        }

        let video_ref = request.video_ref.trim();
        if video_ref.is_empty() || video_ref.len() > MAX_VIDEO_REF_LENGTH {
            return Err(PartyError::BadRequest("Invalid video reference".to_string()));
        }

        let max_participants = request.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
        if max_participants == 0 || max_participants > max_participants_limit {
            return Err(PartyError::BadRequest(format!(
                "maxParticipants must be between 1 and {max_participants_limit}"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            description: description.map(str::to_string),
            video_ref: video_ref.to_string(),
            max_participants,
        })
    }
}

/// Build a fresh room with `host` as its first (host) participant.
///
/// `video` must already be resolved through the catalog.
pub fn create(
    room_id: RoomId,
    settings: RoomSettings,
    video: &VideoInfo,
    host: &UserProfile,
    now: DateTime<Utc>,
) -> Transition {
    let room = Room {
        id: room_id,
        name: settings.name,
        description: settings.description,
        video_ref: settings.video_ref,
        video_title: Some(video.title.clone()),
        host_id: host.user_id,
        max_participants: settings.max_participants,
        status: RoomStatus::Active,
        current_time: 0.0,
        is_paused: false,
        is_active: true,
        sync_seq: 0,
        created_at: now,
        updated_at: now,
    };

    let host_participant = Participant {
        id: ParticipantId::new(),
        room_id,
        user_id: host.user_id,
        display_name: host.name.clone(),
        avatar_url: host.avatar_url.clone(),
        is_host: true,
        is_active: true,
        joined_at: now,
        left_at: None,
    };
    let host_participant_id = host_participant.id;

    let welcome = format!("Welcome to {}! {} is hosting.", room.name, host.name);

    let mut builder = TransitionBuilder::new(RoomAggregate {
        room,
        participants: vec![host_participant],
    });
    builder.touch(host_participant_id);
    builder.message(SystemMessage::system(room_id, host.user_id, welcome, now));
    builder.finish()
}

/// Host-initiated deletion.
///
/// `NotFound` once the room has ended; `Forbidden` for anyone but the
/// current host.
pub fn delete(
    current: &RoomAggregate,
    requester: UserId,
    now: DateTime<Utc>,
) -> Result<Transition, PartyError> {
    if !current.is_live() {
        return Err(PartyError::NotFound("Room not found".to_string()));
    }
    if !current.is_current_host(requester) {
        return Err(PartyError::Forbidden(
            "Only the host can delete the room".to_string(),
        ));
    }

    let mut builder = TransitionBuilder::new(current.clone());
    let host_name = current
        .active_participant(requester)
        .map(|p| p.display_name.clone())
        .unwrap_or_default();
    terminate(
        &mut builder,
        requester,
        format!("{host_name} closed the room"),
        now,
    );
    Ok(builder.finish())
}

/// Move the room to ENDED and soft-remove every active participant.
pub(crate) fn terminate(
    builder: &mut TransitionBuilder,
    actor: UserId,
    text: String,
    now: DateTime<Utc>,
) {
    let room_id = builder.aggregate().room.id;

    let removed: Vec<ParticipantId> = {
        let aggregate = builder.aggregate_mut();
        aggregate.room.status = RoomStatus::Ended;
        aggregate.room.is_active = false;
        aggregate.room.updated_at = now;

        aggregate
            .participants
            .iter_mut()
            .filter(|p| p.is_active)
            .map(|p| {
                p.is_active = false;
                p.is_host = false;
                p.left_at = Some(now);
                p.id
            })
            .collect()
    };

    for id in removed {
        builder.touch(id);
    }

    builder.message(SystemMessage::system(room_id, actor, text, now));
    let view = builder.aggregate().to_view();
    builder.event(RoomEvent::with_view(RoomEventKind::Ended, view));
    builder.critical();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::RoomEventKind;

    fn video() -> VideoInfo {
        VideoInfo {
            id: "bbb".to_string(),
            title: "Big Buck Bunny".to_string(),
            duration_seconds: 596.0,
        }
    }

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            user_id: UserId::new(),
            name: name.to_string(),
            avatar_url: None,
        }
    }

    fn request(name: &str, max: Option<u32>) -> CreateRoomRequest {
        CreateRoomRequest {
            name: name.to_string(),
            description: None,
            video_ref: "bbb".to_string(),
            max_participants: max,
        }
    }

    fn created(host: &UserProfile) -> RoomAggregate {
        let settings = RoomSettings::validate(&request("Movie night", None), 100).unwrap();
        create(RoomId::new(), settings, &video(), host, Utc::now()).next
    }

    #[test]
    fn test_validate_defaults_and_trims() {
        let settings = RoomSettings::validate(&request("  Movie night ", None), 100).unwrap();
        assert_eq!(settings.name, "Movie night");
        assert_eq!(settings.max_participants, DEFAULT_MAX_PARTICIPANTS);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(matches!(
            RoomSettings::validate(&request("   ", None), 100),
            Err(PartyError::BadRequest(_))
        ));
        assert!(matches!(
            RoomSettings::validate(&request("ok", Some(0)), 100),
            Err(PartyError::BadRequest(_))
        ));
        assert!(matches!(
            RoomSettings::validate(&request("ok", Some(101)), 100),
            Err(PartyError::BadRequest(_))
        ));
        let long = "x".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(matches!(
            RoomSettings::validate(&request(&long, None), 100),
            Err(PartyError::BadRequest(_))
        ));
    }

    #[test]
    fn test_create_makes_requester_host() {
        let host = profile("Hana");
        let settings = RoomSettings::validate(&request("Movie night", Some(2)), 100).unwrap();
        let transition = create(RoomId::new(), settings, &video(), &host, Utc::now());

        let agg = &transition.next;
        assert_eq!(agg.room.status, RoomStatus::Active);
        assert_eq!(agg.room.video_title.as_deref(), Some("Big Buck Bunny"));
        assert!(agg.is_current_host(host.user_id));
        assert_eq!(agg.active_count(), 1);

        assert_eq!(transition.commit.participants.len(), 1);
        assert_eq!(transition.commit.messages.len(), 1);
        assert!(transition.events.is_empty());
    }

    #[test]
    fn test_delete_by_host_ends_room() {
        let host = profile("Hana");
        let agg = created(&host);

        let transition = delete(&agg, host.user_id, Utc::now()).unwrap();
        assert_eq!(transition.next.room.status, RoomStatus::Ended);
        assert!(!transition.next.room.is_active);
        assert_eq!(transition.next.active_count(), 0);
        assert!(transition.critical);
        assert_eq!(transition.events.len(), 1);
        assert_eq!(
            transition.events.first().unwrap().event,
            RoomEventKind::Ended
        );
    }

    #[test]
    fn test_delete_by_non_host_is_forbidden() {
        let host = profile("Hana");
        let agg = created(&host);
        assert!(matches!(
            delete(&agg, UserId::new(), Utc::now()),
            Err(PartyError::Forbidden(_))
        ));
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let host = profile("Hana");
        let agg = created(&host);
        let ended = delete(&agg, host.user_id, Utc::now()).unwrap().next;
        assert!(matches!(
            delete(&ended, host.user_id, Utc::now()),
            Err(PartyError::NotFound(_))
        ));
    }
}
