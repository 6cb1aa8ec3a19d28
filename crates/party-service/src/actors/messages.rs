//! Message types for actor communication.
//!
//! Requests carry a `oneshot` sender for the reply. Notifications from
//! connection actors and grace timers are fire-and-forget.

use super::connection::EventSink;
use super::room::RoomActorHandle;
use crate::catalog::VideoInfo;
use crate::errors::PartyError;
use crate::identity::UserProfile;
use crate::lifecycle::RoomSettings;
use crate::models::RoomView;
use crate::playback::SyncCommand;
use common::types::{RoomId, UserId};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the actor for `room_id`, spawning it if none is running.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, PartyError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop handing out room actors and wind every room down.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },
}

/// Messages sent to `RoomActor`.
pub enum RoomMessage {
    /// Create the room this actor was spawned for.
    Create {
        settings: RoomSettings,
        video: VideoInfo,
        host: UserProfile,
        respond_to: oneshot::Sender<Result<RoomView, PartyError>>,
    },

    Join {
        profile: UserProfile,
        respond_to: oneshot::Sender<Result<RoomView, PartyError>>,
    },

    /// Explicit leave.
    Leave {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    Sync {
        user_id: UserId,
        command: SyncCommand,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    Delete {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    GetView {
        respond_to: oneshot::Sender<Result<RoomView, PartyError>>,
    },

    /// Attach a push subscriber for `user_id`.
    Subscribe {
        user_id: UserId,
        sink: Box<dyn EventSink>,
        respond_to: oneshot::Sender<Result<Subscribed, PartyError>>,
    },

    /// A subscriber's transport went away.
    ConnectionClosed { connection_id: ConnectionId },

    /// A disconnect grace timer fired.
    GraceExpired { user_id: UserId, timer_id: u64 },

    GetState {
        respond_to: oneshot::Sender<RoomActorState>,
    },
}

impl fmt::Debug for RoomMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomMessage::Create { settings, .. } => {
                f.debug_struct("Create").field("name", &settings.name).finish()
            }
            RoomMessage::Join { profile, .. } => {
                f.debug_struct("Join").field("user_id", &profile.user_id).finish()
            }
            RoomMessage::Leave { user_id, .. } => {
                f.debug_struct("Leave").field("user_id", user_id).finish()
            }
            RoomMessage::Sync { user_id, command, .. } => f
                .debug_struct("Sync")
                .field("user_id", user_id)
                .field("command", command)
                .finish(),
            RoomMessage::Delete { user_id, .. } => {
                f.debug_struct("Delete").field("user_id", user_id).finish()
            }
            RoomMessage::GetView { .. } => f.write_str("GetView"),
            RoomMessage::Subscribe { user_id, .. } => {
                f.debug_struct("Subscribe").field("user_id", user_id).finish()
            }
            RoomMessage::ConnectionClosed { connection_id } => f
                .debug_struct("ConnectionClosed")
                .field("connection_id", connection_id)
                .finish(),
            RoomMessage::GraceExpired { user_id, timer_id } => f
                .debug_struct("GraceExpired")
                .field("user_id", user_id)
                .field("timer_id", timer_id)
                .finish(),
            RoomMessage::GetState { .. } => f.write_str("GetState"),
        }
    }
}

/// Identifies one push subscriber within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reply to a successful subscribe.
#[derive(Debug, Clone)]
pub struct Subscribed {
    pub connection_id: ConnectionId,
    /// Room state at the moment the subscriber was attached. Every event
    /// published afterwards reaches the new subscriber.
    pub view: RoomView,
}

#[derive(Debug, Clone)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub accepting_new: bool,
}

/// Snapshot of a room actor, for health checks and tests.
#[derive(Debug, Clone)]
pub struct RoomActorState {
    pub room_id: RoomId,
    /// `None` until the room has been loaded or created.
    pub view: Option<RoomView>,
    pub subscribers: usize,
    pub pending_grace_timers: usize,
    pub next_event_seq: u64,
    /// Set once the room has ended and the actor is draining.
    pub draining: bool,
}
