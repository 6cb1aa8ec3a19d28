//! Store double that fails commits on demand.

use async_trait::async_trait;
use common::types::RoomId;
use party_service::errors::PartyError;
use party_service::models::{RoomAggregate, SystemMessage};
use party_service::store::{InMemoryRoomStore, RoomCommit, RoomQuery, RoomStore};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// In-memory store whose next N commits fail with `PartyError::Store`.
///
/// Failed commits write nothing, like a rolled-back transaction.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryRoomStore,
    failures_remaining: AtomicU32,
    commit_attempts: AtomicU64,
    commits_applied: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` commits.
    pub fn fail_next_commits(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn commit_attempts(&self) -> u64 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    pub fn commits_applied(&self) -> u64 {
        self.commits_applied.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RoomStore for FaultyStore {
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomAggregate>, PartyError> {
        self.inner.load_room(room_id).await
    }

    async fn commit(&self, commit: &RoomCommit) -> Result<(), PartyError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(PartyError::Store("injected commit failure".to_string()));
        }
        self.inner.commit(commit).await?;
        self.commits_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_rooms(&self, query: &RoomQuery) -> Result<(Vec<RoomAggregate>, u64), PartyError> {
        self.inner.list_rooms(query).await
    }

    async fn list_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<SystemMessage>, PartyError> {
        self.inner.list_messages(room_id, limit).await
    }

    async fn ping(&self) -> Result<(), PartyError> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_count_down() {
        let store = FaultyStore::new();
        store.fail_next_commits(2);
        assert!(store.take_failure());
        assert!(store.take_failure());
        assert!(!store.take_failure());
    }
}
