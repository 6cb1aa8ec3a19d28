//! Join, leave and host transfer.
//!
//! Capacity and duplicate-membership checks run inside the room actor against
//! the aggregate it owns, so concurrent joiners are decided one at a time in
//! arrival order.

use crate::errors::PartyError;
use crate::identity::UserProfile;
use crate::lifecycle;
use crate::models::{Participant, RoomAggregate, RoomEvent, RoomEventKind, SystemMessage};
use crate::transition::{Transition, TransitionBuilder};
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, UserId};

/// Why a participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Explicit `leaveRoom`.
    Voluntary,
    /// The disconnect grace period expired.
    Disconnected,
}

impl LeaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Voluntary => "voluntary",
            LeaveReason::Disconnected => "disconnected",
        }
    }
}

/// Admit `profile` into the room, reactivating their previous row if any.
pub fn join(
    current: &RoomAggregate,
    profile: &UserProfile,
    now: DateTime<Utc>,
) -> Result<Transition, PartyError> {
    if !current.is_live() {
        return Err(PartyError::NotFound("Room not found".to_string()));
    }
    if current.active_participant(profile.user_id).is_some() {
        return Err(PartyError::Conflict(
            "User is already a member of this room".to_string(),
        ));
    }
    if !current.has_space() {
        return Err(PartyError::Conflict("Room is full".to_string()));
    }

    let mut builder = TransitionBuilder::new(current.clone());
    let room_id = current.room.id;

    let participant_id = {
        let aggregate = builder.aggregate_mut();
        aggregate.room.updated_at = now;

        match aggregate
            .participants
            .iter_mut()
            .find(|p| p.user_id == profile.user_id)
        {
            Some(row) => {
                row.is_active = true;
                row.is_host = false;
                row.joined_at = now;
                row.left_at = None;
                row.display_name = profile.name.clone();
                row.avatar_url = profile.avatar_url.clone();
                row.id
            }
            None => {
                let row = Participant {
                    id: ParticipantId::new(),
                    room_id,
                    user_id: profile.user_id,
                    display_name: profile.name.clone(),
                    avatar_url: profile.avatar_url.clone(),
                    is_host: false,
                    is_active: true,
                    joined_at: now,
                    left_at: None,
                };
                let id = row.id;
                aggregate.participants.push(row);
                id
            }
        }
    };

    builder.touch(participant_id);
    builder.message(SystemMessage::system(
        room_id,
        profile.user_id,
        format!("{} joined the room", profile.name),
        now,
    ));
    let view = builder.aggregate().to_view();
    builder.event(RoomEvent::with_view(RoomEventKind::Joined, view));

    Ok(builder.finish())
}

/// Soft-remove `user_id`, promoting a new host or ending the room as needed.
///
/// Removal, promotion (or termination) and their messages land in one
/// transition and therefore one commit.
pub fn leave(
    current: &RoomAggregate,
    user_id: UserId,
    reason: LeaveReason,
    now: DateTime<Utc>,
) -> Result<Transition, PartyError> {
    if !current.is_live() {
        return Err(PartyError::NotFound("Room not found".to_string()));
    }
    let Some(departing) = current.active_participant(user_id) else {
        return Err(PartyError::NotFound(
            "User is not a member of this room".to_string(),
        ));
    };
    let departing_id = departing.id;
    let departing_name = departing.display_name.clone();
    let was_host = departing.is_host;
    let room_id = current.room.id;

    let mut builder = TransitionBuilder::new(current.clone());
    {
        let aggregate = builder.aggregate_mut();
        aggregate.room.updated_at = now;
        if let Some(row) = aggregate
            .participants
            .iter_mut()
            .find(|p| p.id == departing_id)
        {
            row.is_active = false;
            row.is_host = false;
            row.left_at = Some(now);
        }
    }
    builder.touch(departing_id);

    let text = match reason {
        LeaveReason::Voluntary => format!("{departing_name} left the room"),
        LeaveReason::Disconnected => format!("{departing_name} disconnected"),
    };
    builder.message(SystemMessage::system(room_id, user_id, text, now));
    let view = builder.aggregate().to_view();
    builder.event(RoomEvent::with_view(RoomEventKind::Left, view));

    if builder.aggregate().active_count() == 0 {
        lifecycle::terminate(
            &mut builder,
            user_id,
            "Room ended: the last participant left".to_string(),
            now,
        );
        return Ok(builder.finish());
    }

    if was_host {
        promote_earliest(&mut builder, now);
    }

    Ok(builder.finish())
}

/// Hand host authority to the remaining participant who joined first.
fn promote_earliest(builder: &mut TransitionBuilder, now: DateTime<Utc>) {
    let successor = builder
        .aggregate()
        .active_participants()
        .min_by_key(|p| (p.joined_at, p.id))
        .map(|p| (p.id, p.user_id, p.display_name.clone()));

    let Some((participant_id, successor_user, successor_name)) = successor else {
        return;
    };

    let room_id = {
        let aggregate = builder.aggregate_mut();
        aggregate.room.host_id = successor_user;
        if let Some(row) = aggregate
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
        {
            row.is_host = true;
        }
        aggregate.room.id
    };

    builder.touch(participant_id);
    builder.message(SystemMessage::system(
        room_id,
        successor_user,
        format!("{successor_name} is now the host"),
        now,
    ));
    let view = builder.aggregate().to_view();
    builder.event(RoomEvent::with_view(RoomEventKind::HostChanged, view));
    builder.critical();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::VideoInfo;
    use crate::lifecycle::{create, RoomSettings};
    use crate::models::{CreateRoomRequest, RoomStatus};
    use chrono::Duration;
    use common::types::RoomId;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            user_id: UserId::new(),
            name: name.to_string(),
            avatar_url: None,
        }
    }

    fn room(host: &UserProfile, max: u32, t0: DateTime<Utc>) -> RoomAggregate {
        let settings = RoomSettings::validate(
            &CreateRoomRequest {
                name: "R".to_string(),
                description: None,
                video_ref: "bbb".to_string(),
                max_participants: Some(max),
            },
            100,
        )
        .unwrap();
        let video = VideoInfo {
            id: "bbb".to_string(),
            title: "Big Buck Bunny".to_string(),
            duration_seconds: 596.0,
        };
        create(RoomId::new(), settings, &video, host, t0).next
    }

    fn hosts(agg: &RoomAggregate) -> usize {
        agg.active_participants().filter(|p| p.is_host).count()
    }

    #[test]
    fn test_join_adds_participant() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let alex = profile("Alex");
        let agg = room(&host, 3, t0);

        let transition = join(&agg, &alex, t0 + Duration::seconds(1)).unwrap();
        assert_eq!(transition.next.active_count(), 2);
        assert_eq!(hosts(&transition.next), 1);
        assert_eq!(transition.commit.participants.len(), 1);
        assert_eq!(transition.events.first().unwrap().event, RoomEventKind::Joined);
    }

    #[test]
    fn test_join_full_room_conflicts() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let agg = room(&host, 2, t0);
        let agg = join(&agg, &profile("Alex"), t0).unwrap().next;

        assert!(matches!(
            join(&agg, &profile("Bea"), t0),
            Err(PartyError::Conflict(_))
        ));
    }

    #[test]
    fn test_duplicate_join_conflicts() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let agg = room(&host, 5, t0);
        assert!(matches!(join(&agg, &host, t0), Err(PartyError::Conflict(_))));
    }

    #[test]
    fn test_rejoin_reuses_participant_id() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let alex = profile("Alex");
        let agg = room(&host, 5, t0);
        let agg = join(&agg, &alex, t0).unwrap().next;
        let first_id = agg.active_participant(alex.user_id).unwrap().id;

        let agg = leave(&agg, alex.user_id, LeaveReason::Voluntary, t0).unwrap().next;
        let agg = join(&agg, &alex, t0 + Duration::seconds(10)).unwrap().next;

        assert_eq!(agg.participants.len(), 2);
        assert_eq!(agg.active_participant(alex.user_id).unwrap().id, first_id);
    }

    #[test]
    fn test_host_leave_promotes_earliest_joiner() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let alex = profile("Alex");
        let bea = profile("Bea");
        let agg = room(&host, 5, t0);
        let agg = join(&agg, &alex, t0 + Duration::seconds(1)).unwrap().next;
        let agg = join(&agg, &bea, t0 + Duration::seconds(2)).unwrap().next;

        let transition = leave(&agg, host.user_id, LeaveReason::Voluntary, t0).unwrap();
        let next = &transition.next;

        assert!(next.is_current_host(alex.user_id));
        assert_eq!(hosts(next), 1);
        assert_eq!(next.room.status, RoomStatus::Active);
        assert!(transition.critical);
        // departing row + promoted row
        assert_eq!(transition.commit.participants.len(), 2);
        let kinds: Vec<_> = transition.events.iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![RoomEventKind::Left, RoomEventKind::HostChanged]);
    }

    #[test]
    fn test_rejoined_user_is_not_earliest() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let alex = profile("Alex");
        let bea = profile("Bea");
        let agg = room(&host, 5, t0);
        let agg = join(&agg, &alex, t0 + Duration::seconds(1)).unwrap().next;
        let agg = join(&agg, &bea, t0 + Duration::seconds(2)).unwrap().next;
        let agg = leave(&agg, alex.user_id, LeaveReason::Voluntary, t0).unwrap().next;
        let agg = join(&agg, &alex, t0 + Duration::seconds(3)).unwrap().next;

        let next = leave(&agg, host.user_id, LeaveReason::Voluntary, t0).unwrap().next;
        assert!(next.is_current_host(bea.user_id));
    }

    #[test]
    fn test_last_leave_ends_room() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let agg = room(&host, 5, t0);

        let transition = leave(&agg, host.user_id, LeaveReason::Disconnected, t0).unwrap();
        assert_eq!(transition.next.room.status, RoomStatus::Ended);
        assert!(!transition.next.room.is_active);
        assert!(transition.critical);

        let ended: Vec<_> = transition
            .events
            .iter()
            .filter(|e| e.event == RoomEventKind::Ended)
            .collect();
        assert_eq!(ended.len(), 1);
    }

    #[test]
    fn test_non_host_leave_keeps_host() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let alex = profile("Alex");
        let agg = room(&host, 5, t0);
        let agg = join(&agg, &alex, t0).unwrap().next;

        let transition = leave(&agg, alex.user_id, LeaveReason::Voluntary, t0).unwrap();
        assert!(transition.next.is_current_host(host.user_id));
        assert!(!transition.critical);
    }

    #[test]
    fn test_leave_unknown_user_not_found() {
        let t0 = Utc::now();
        let host = profile("Hana");
        let agg = room(&host, 5, t0);
        assert!(matches!(
            leave(&agg, UserId::new(), LeaveReason::Voluntary, t0),
            Err(PartyError::NotFound(_))
        ));
    }
}
