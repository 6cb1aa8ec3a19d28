//! In-memory room store.
//!
//! Used when no database is configured and as the base for test doubles. A
//! commit is validated and applied under one write lock, so readers observe
//! either none or all of it.

use super::{RoomCommit, RoomQuery, RoomStore};
use crate::errors::PartyError;
use crate::models::{Participant, Room, RoomAggregate, SystemMessage};
use async_trait::async_trait;
use common::types::RoomId;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRoom {
    room: Room,
    participants: Vec<Participant>,
    messages: Vec<SystemMessage>,
}

impl StoredRoom {
    fn aggregate(&self) -> RoomAggregate {
        RoomAggregate {
            room: self.room.clone(),
            participants: self.participants.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, StoredRoom>>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> PartyError {
        PartyError::Store("room store lock poisoned".to_string())
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomAggregate>, PartyError> {
        let rooms = self.rooms.read().map_err(|_| Self::poisoned())?;
        Ok(rooms.get(&room_id).map(StoredRoom::aggregate))
    }

    async fn commit(&self, commit: &RoomCommit) -> Result<(), PartyError> {
        let mut rooms = self.rooms.write().map_err(|_| Self::poisoned())?;
        let room_id = commit.room.id;

        let existing = rooms.get(&room_id);
        for row in &commit.participants {
            if row.room_id != room_id {
                return Err(PartyError::Internal(
                    "participant row belongs to another room".to_string(),
                ));
            }
            let duplicate = existing.is_some_and(|stored| {
                stored
                    .participants
                    .iter()
                    .any(|p| p.user_id == row.user_id && p.id != row.id)
            });
            if duplicate {
                return Err(PartyError::Conflict(
                    "User is already a member of this room".to_string(),
                ));
            }
        }

        let stored = rooms.entry(room_id).or_insert_with(|| StoredRoom {
            room: commit.room.clone(),
            participants: Vec::new(),
            messages: Vec::new(),
        });
        stored.room = commit.room.clone();
        for row in &commit.participants {
            match stored.participants.iter_mut().find(|p| p.id == row.id) {
                Some(slot) => *slot = row.clone(),
                None => stored.participants.push(row.clone()),
            }
        }
        stored.messages.extend(commit.messages.iter().cloned());

        Ok(())
    }

    async fn list_rooms(&self, query: &RoomQuery) -> Result<(Vec<RoomAggregate>, u64), PartyError> {
        let rooms = self.rooms.read().map_err(|_| Self::poisoned())?;

        let mut matching: Vec<RoomAggregate> = rooms
            .values()
            .map(StoredRoom::aggregate)
            .filter(|agg| agg.is_live())
            .filter(|agg| query.status.map_or(true, |s| agg.room.status == s))
            .filter(|agg| !query.has_space || agg.has_space())
            .collect();

        matching.sort_by(|a, b| {
            b.room
                .created_at
                .cmp(&a.room.created_at)
                .then_with(|| b.room.id.cmp(&a.room.id))
        });

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let page = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn list_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<SystemMessage>, PartyError> {
        let rooms = self.rooms.read().map_err(|_| Self::poisoned())?;
        let Some(stored) = rooms.get(&room_id) else {
            return Ok(Vec::new());
        };

        let skip = stored.messages.len().saturating_sub(limit as usize);
        Ok(stored.messages.iter().skip(skip).cloned().collect())
    }

    async fn ping(&self) -> Result<(), PartyError> {
        self.rooms.read().map(|_| ()).map_err(|_| Self::poisoned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{RoomStatus, SystemMessage};
    use chrono::{Duration, Utc};
    use common::types::{ParticipantId, UserId};

    fn room(created_offset_secs: i64, max: u32) -> Room {
        let now = Utc::now() + Duration::seconds(created_offset_secs);
        Room {
            id: RoomId::new(),
            name: "R".to_string(),
            description: None,
            video_ref: "bbb".to_string(),
            video_title: None,
            host_id: UserId::new(),
            max_participants: max,
            status: RoomStatus::Active,
            current_time: 0.0,
            is_paused: false,
            is_active: true,
            sync_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn participant(room: &Room, user_id: UserId, is_host: bool) -> Participant {
        Participant {
            id: ParticipantId::new(),
            room_id: room.id,
            user_id,
            display_name: "P".to_string(),
            avatar_url: None,
            is_host,
            is_active: true,
            joined_at: room.created_at,
            left_at: None,
        }
    }

    fn seed(room: &Room, members: usize) -> RoomCommit {
        let mut participants = vec![participant(room, room.host_id, true)];
        for _ in 1..members {
            participants.push(participant(room, UserId::new(), false));
        }
        RoomCommit {
            room: room.clone(),
            participants,
            messages: vec![SystemMessage::system(room.id, room.host_id, "Welcome", Utc::now())],
        }
    }

    #[tokio::test]
    async fn test_commit_then_load() {
        let store = InMemoryRoomStore::new();
        let r = room(0, 4);
        store.commit(&seed(&r, 2)).await.unwrap();

        let agg = store.load_room(r.id).await.unwrap().unwrap();
        assert_eq!(agg.room, r);
        assert_eq!(agg.active_count(), 2);
        assert!(store.load_room(RoomId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_row_is_rejected_atomically() {
        let store = InMemoryRoomStore::new();
        let r = room(0, 4);
        store.commit(&seed(&r, 1)).await.unwrap();

        let mut renamed = r.clone();
        renamed.name = "changed".to_string();
        let bad = RoomCommit {
            room: renamed,
            participants: vec![participant(&r, r.host_id, false)],
            messages: vec![SystemMessage::system(r.id, r.host_id, "dup", Utc::now())],
        };

        assert!(matches!(store.commit(&bad).await, Err(PartyError::Conflict(_))));

        let agg = store.load_room(r.id).await.unwrap().unwrap();
        assert_eq!(agg.room.name, "R");
        assert_eq!(agg.participants.len(), 1);
        assert_eq!(store.list_messages(r.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_rooms_filters_and_pages() {
        let store = InMemoryRoomStore::new();
        let older = room(-10, 2);
        let newer = room(0, 2);
        let mut ended = room(5, 2);
        ended.status = RoomStatus::Ended;
        ended.is_active = false;

        store.commit(&seed(&older, 2)).await.unwrap();
        store.commit(&seed(&newer, 1)).await.unwrap();
        store.commit(&seed(&ended, 1)).await.unwrap();

        let all = RoomQuery {
            offset: 0,
            limit: 10,
            status: None,
            has_space: false,
        };
        let (rooms, total) = store.list_rooms(&all).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rooms.first().unwrap().room.id, newer.id);

        let open = RoomQuery {
            has_space: true,
            ..all.clone()
        };
        let (rooms, total) = store.list_rooms(&open).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rooms.first().unwrap().room.id, newer.id);

        let second_page = RoomQuery {
            offset: 1,
            limit: 1,
            ..all
        };
        let (rooms, total) = store.list_rooms(&second_page).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rooms.first().unwrap().room.id, older.id);
    }

    #[tokio::test]
    async fn test_list_messages_returns_latest_in_order() {
        let store = InMemoryRoomStore::new();
        let r = room(0, 4);
        let mut commit = seed(&r, 1);
        for i in 0..5 {
            commit
                .messages
                .push(SystemMessage::system(r.id, r.host_id, format!("m{i}"), Utc::now()));
        }
        store.commit(&commit).await.unwrap();

        let texts: Vec<String> = store
            .list_messages(r.id, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["m3".to_string(), "m4".to_string()]);
    }
}
