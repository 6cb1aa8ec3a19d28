//! Postgres room store.
//!
//! Uses runtime-checked sqlx queries. A commit runs in one transaction: the
//! room row is upserted, touched participant rows are upserted in order and
//! messages are appended. The `(room_id, user_id)` unique constraint and the
//! one-active-host index back up the actor's own checks.

use super::{RoomCommit, RoomQuery, RoomStore};
use crate::errors::PartyError;
use crate::models::{MessageKind, Participant, Room, RoomAggregate, SystemMessage};
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{MessageId, ParticipantId, RoomId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const ROOM_COLUMNS: &str = "room_id, name, description, video_ref, video_title, host_user_id, \
     max_participants, status, playback_position, is_paused, is_active, sync_seq, \
     created_at, updated_at";

const PARTICIPANT_COLUMNS: &str = "participant_id, room_id, user_id, display_name, avatar_url, \
     is_host, is_active, joined_at, left_at";

#[derive(Debug, Clone)]
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    pub async fn migrate(&self) -> Result<(), PartyError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PartyError::Store(format!("migration failed: {e}")))
    }

    async fn load_participants(
        &self,
        room_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Participant>>, PartyError> {
        let rows = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM room_participants \
             WHERE room_id = ANY($1) ORDER BY joined_at, participant_id"
        ))
        .bind(room_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_room: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for row in rows {
            let participant = map_row_to_participant(&row)?;
            by_room
                .entry(participant.room_id.as_uuid())
                .or_default()
                .push(participant);
        }
        Ok(by_room)
    }
}

fn to_i32(value: u32, column: &str) -> Result<i32, PartyError> {
    i32::try_from(value).map_err(|_| PartyError::Internal(format!("{column} out of range")))
}

fn to_i64(value: u64, column: &str) -> Result<i64, PartyError> {
    i64::try_from(value).map_err(|_| PartyError::Internal(format!("{column} out of range")))
}

fn map_row_to_room(row: &PgRow) -> Result<Room, PartyError> {
    let status: String = row.try_get("status")?;
    let max_participants: i32 = row.try_get("max_participants")?;
    let sync_seq: i64 = row.try_get("sync_seq")?;

    Ok(Room {
        id: RoomId(row.try_get("room_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        video_ref: row.try_get("video_ref")?,
        video_title: row.try_get("video_title")?,
        host_id: UserId(row.try_get("host_user_id")?),
        max_participants: u32::try_from(max_participants)
            .map_err(|_| PartyError::Store("negative max_participants".to_string()))?,
        status: status.parse().map_err(PartyError::Store)?,
        current_time: row.try_get("playback_position")?,
        is_paused: row.try_get("is_paused")?,
        is_active: row.try_get("is_active")?,
        sync_seq: u64::try_from(sync_seq)
            .map_err(|_| PartyError::Store("negative sync_seq".to_string()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_row_to_participant(row: &PgRow) -> Result<Participant, PartyError> {
    Ok(Participant {
        id: ParticipantId(row.try_get("participant_id")?),
        room_id: RoomId(row.try_get("room_id")?),
        user_id: UserId(row.try_get("user_id")?),
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        is_host: row.try_get("is_host")?,
        is_active: row.try_get("is_active")?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
    })
}

fn map_row_to_message(row: &PgRow) -> Result<SystemMessage, PartyError> {
    let kind: String = row.try_get("kind")?;
    let kind: MessageKind = kind.parse().map_err(PartyError::Store)?;

    Ok(SystemMessage {
        id: MessageId(row.try_get("message_id")?),
        room_id: RoomId(row.try_get("room_id")?),
        user_id: UserId(row.try_get("user_id")?),
        text: row.try_get("text")?,
        kind,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RoomStore for PgRoomStore {
    #[instrument(skip(self), name = "party.store.load_room")]
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomAggregate>, PartyError> {
        let start = Instant::now();
        let row = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = $1"
        ))
        .bind(room_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|_| metrics::record_store_query("load_room", "error", start.elapsed()))?;

        let Some(row) = row else {
            metrics::record_store_query("load_room", "success", start.elapsed());
            return Ok(None);
        };
        let room = map_row_to_room(&row)?;
        let participants = self
            .load_participants(&[room_id.as_uuid()])
            .await?
            .remove(&room_id.as_uuid())
            .unwrap_or_default();

        metrics::record_store_query("load_room", "success", start.elapsed());
        Ok(Some(RoomAggregate { room, participants }))
    }

    #[instrument(skip_all, name = "party.store.commit", fields(room_id = %commit.room.id))]
    async fn commit(&self, commit: &RoomCommit) -> Result<(), PartyError> {
        let start = Instant::now();
        let result = async {
            let room = &commit.room;
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO rooms (
                    room_id, name, description, video_ref, video_title, host_user_id,
                    max_participants, status, playback_position, is_paused, is_active,
                    sync_seq, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (room_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    description = EXCLUDED.description,
                    host_user_id = EXCLUDED.host_user_id,
                    max_participants = EXCLUDED.max_participants,
                    status = EXCLUDED.status,
                    playback_position = EXCLUDED.playback_position,
                    is_paused = EXCLUDED.is_paused,
                    is_active = EXCLUDED.is_active,
                    sync_seq = EXCLUDED.sync_seq,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(room.id.as_uuid()) // $1
            .bind(&room.name) // $2
            .bind(&room.description) // $3
            .bind(&room.video_ref) // $4
            .bind(&room.video_title) // $5
            .bind(room.host_id.as_uuid()) // $6
            .bind(to_i32(room.max_participants, "max_participants")?) // $7
            .bind(room.status.as_str()) // $8
            .bind(room.current_time) // $9
            .bind(room.is_paused) // $10
            .bind(room.is_active) // $11
            .bind(to_i64(room.sync_seq, "sync_seq")?) // $12
            .bind(room.created_at) // $13
            .bind(room.updated_at) // $14
            .execute(&mut *tx)
            .await?;

            for p in &commit.participants {
                sqlx::query(
                    r#"
                    INSERT INTO room_participants (
                        participant_id, room_id, user_id, display_name, avatar_url,
                        is_host, is_active, joined_at, left_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (participant_id) DO UPDATE SET
                        display_name = EXCLUDED.display_name,
                        avatar_url = EXCLUDED.avatar_url,
                        is_host = EXCLUDED.is_host,
                        is_active = EXCLUDED.is_active,
                        joined_at = EXCLUDED.joined_at,
                        left_at = EXCLUDED.left_at
                    "#,
                )
                .bind(p.id.as_uuid())
                .bind(p.room_id.as_uuid())
                .bind(p.user_id.as_uuid())
                .bind(&p.display_name)
                .bind(&p.avatar_url)
                .bind(p.is_host)
                .bind(p.is_active)
                .bind(p.joined_at)
                .bind(p.left_at)
                .execute(&mut *tx)
                .await?;
            }

            for m in &commit.messages {
                sqlx::query(
                    r#"
                    INSERT INTO room_messages (
                        message_id, room_id, user_id, text, kind, metadata, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(m.id.as_uuid())
                .bind(m.room_id.as_uuid())
                .bind(m.user_id.as_uuid())
                .bind(&m.text)
                .bind(m.kind.as_str())
                .bind(&m.metadata)
                .bind(m.created_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<(), PartyError>(())
        }
        .await;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_store_query("commit", status, start.elapsed());
        result
    }

    #[instrument(skip(self), name = "party.store.list_rooms")]
    async fn list_rooms(&self, query: &RoomQuery) -> Result<(Vec<RoomAggregate>, u64), PartyError> {
        let start = Instant::now();
        let status = query.status.map(|s| s.as_str());
        let filter = r#"
            r.is_active AND r.status <> 'ENDED'
            AND ($1::text IS NULL OR r.status = $1)
            AND (NOT $2 OR (
                SELECT COUNT(*) FROM room_participants p
                WHERE p.room_id = r.room_id AND p.is_active
            ) < r.max_participants)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM rooms r WHERE {filter}"))
            .bind(status)
            .bind(query.has_space)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r WHERE {filter} \
             ORDER BY r.created_at DESC, r.room_id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(status)
        .bind(query.has_space)
        .bind(i64::from(query.limit))
        .bind(to_i64(query.offset, "offset")?)
        .fetch_all(&self.pool)
        .await?;

        let rooms = rows
            .iter()
            .map(map_row_to_room)
            .collect::<Result<Vec<Room>, PartyError>>()?;
        let ids: Vec<Uuid> = rooms.iter().map(|r| r.id.as_uuid()).collect();
        let mut participants = self.load_participants(&ids).await?;

        let aggregates = rooms
            .into_iter()
            .map(|room| {
                let participants = participants.remove(&room.id.as_uuid()).unwrap_or_default();
                RoomAggregate { room, participants }
            })
            .collect();

        metrics::record_store_query("list_rooms", "success", start.elapsed());
        Ok((aggregates, u64::try_from(total).unwrap_or(0)))
    }

    #[instrument(skip(self), name = "party.store.list_messages")]
    async fn list_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<SystemMessage>, PartyError> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, room_id, user_id, text, kind, metadata, created_at
            FROM (
                SELECT * FROM room_messages
                WHERE room_id = $1
                ORDER BY seq DESC
                LIMIT $2
            ) latest
            ORDER BY seq ASC
            "#,
        )
        .bind(room_id.as_uuid())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row_to_message).collect()
    }

    async fn ping(&self) -> Result<(), PartyError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
