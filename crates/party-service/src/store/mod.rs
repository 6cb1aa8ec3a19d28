//! Durable storage for rooms, participant rows and audit messages.
//!
//! All writes for a room go through [`RoomStore::commit`], which applies a
//! [`RoomCommit`] as one atomic unit. Only the room's actor calls `commit`,
//! so writes for one room id are never issued concurrently.

pub mod memory;
pub mod postgres;

use crate::errors::PartyError;
use crate::models::{Participant, Room, RoomAggregate, RoomStatus, SystemMessage};
use async_trait::async_trait;
use common::types::RoomId;

pub use memory::InMemoryRoomStore;
pub use postgres::PgRoomStore;

/// Rows written by one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomCommit {
    /// Full room record, inserted or overwritten.
    pub room: Room,
    /// Participant rows inserted or overwritten, keyed by participant id.
    pub participants: Vec<Participant>,
    /// Messages appended to the audit trail.
    pub messages: Vec<SystemMessage>,
}

/// Listing filter for live rooms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomQuery {
    pub offset: u64,
    pub limit: u32,
    pub status: Option<RoomStatus>,
    /// Only rooms with fewer active participants than `max_participants`.
    pub has_space: bool,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Load a room and every participant row it has had, ended or not.
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomAggregate>, PartyError>;

    /// Apply a commit atomically. On error nothing from the commit is visible.
    async fn commit(&self, commit: &RoomCommit) -> Result<(), PartyError>;

    /// Live rooms, newest first, with the total matching the filter.
    async fn list_rooms(&self, query: &RoomQuery) -> Result<(Vec<RoomAggregate>, u64), PartyError>;

    /// The most recent `limit` messages of a room, oldest first.
    async fn list_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<SystemMessage>, PartyError>;

    /// Connectivity probe for readiness.
    async fn ping(&self) -> Result<(), PartyError>;
}
