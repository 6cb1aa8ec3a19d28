//! Transport-agnostic room operations.
//!
//! Mutations are routed to the room's actor through the registry. Reads
//! (`get_room`, `list_rooms`, `list_messages`) go straight to the store,
//! which the actor only ever writes ahead of its own state.

use crate::actors::{ConnectionId, EventSink, RoomActorHandle, RoomRegistryHandle};
use crate::catalog::VideoCatalog;
use crate::errors::PartyError;
use crate::identity::UserProfile;
use crate::lifecycle::RoomSettings;
use crate::models::{
    CreateRoomRequest, ListMessagesQuery, ListRoomsQuery, ListRoomsResponse, RoomView,
    SyncRequest, SystemMessage,
};
use crate::observability::metrics::record_room_operation;
use crate::playback::SyncCommand;
use crate::store::{RoomQuery, RoomStore};
use common::types::{RoomId, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, Span};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;
pub const MAX_MESSAGE_LIMIT: u32 = 200;

/// A live push subscription.
///
/// Dropping it without calling [`Subscription::close`] leaves the room to
/// notice the dead transport when a delivery fails.
#[derive(Debug)]
pub struct Subscription {
    pub connection_id: ConnectionId,
    /// Room state at subscribe time.
    pub view: RoomView,
    room: RoomActorHandle,
}

impl Subscription {
    /// Tell the room the transport went away. Starts the grace period.
    pub async fn close(self) {
        self.room.connection_closed(self.connection_id).await;
    }
}

pub struct PartyService {
    registry: RoomRegistryHandle,
    store: Arc<dyn RoomStore>,
    catalog: Arc<dyn VideoCatalog>,
    max_participants_limit: u32,
}

impl PartyService {
    pub fn new(
        registry: RoomRegistryHandle,
        store: Arc<dyn RoomStore>,
        catalog: Arc<dyn VideoCatalog>,
        max_participants_limit: u32,
    ) -> Self {
        Self {
            registry,
            store,
            catalog,
            max_participants_limit,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.registry
    }

    #[instrument(
        skip_all,
        name = "party.service.create_room",
        fields(user_id = %host.user_id, room_id = tracing::field::Empty)
    )]
    pub async fn create_room(
        &self,
        host: &UserProfile,
        request: &CreateRoomRequest,
    ) -> Result<RoomView, PartyError> {
        timed("create_room", async {
            let settings = RoomSettings::validate(request, self.max_participants_limit)?;
            let video = self.catalog.resolve(&settings.video_ref).await?;

            let room_id = RoomId::new();
            Span::current().record("room_id", tracing::field::display(room_id));

            let room = self.registry.room(room_id).await?;
            let view = room.create(settings, video, host.clone()).await?;
            info!(
                target: "party.service",
                room_id = %view.id,
                host_id = %host.user_id,
                video_ref = %view.video_ref,
                "Room created"
            );
            Ok(view)
        })
        .await
    }

    #[instrument(skip_all, name = "party.service.list_rooms")]
    pub async fn list_rooms(
        &self,
        query: &ListRoomsQuery,
    ) -> Result<ListRoomsResponse, PartyError> {
        timed("list_rooms", async {
            let page = query.page.unwrap_or(1);
            if page == 0 {
                return Err(PartyError::BadRequest("page must be at least 1".to_string()));
            }
            let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
            if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
                return Err(PartyError::BadRequest(format!(
                    "limit must be between 1 and {MAX_PAGE_LIMIT}"
                )));
            }
            if query.status.is_some_and(|s| s.is_terminal()) {
                return Err(PartyError::BadRequest(
                    "status must be ACTIVE or PAUSED".to_string(),
                ));
            }

            let (rooms, total) = self
                .store
                .list_rooms(&RoomQuery {
                    offset: u64::from(page - 1) * u64::from(limit),
                    limit,
                    status: query.status,
                    has_space: query.has_space.unwrap_or(false),
                })
                .await?;

            Ok(ListRoomsResponse {
                rooms: rooms.iter().map(|agg| agg.to_view()).collect(),
                total,
                page,
                limit,
            })
        })
        .await
    }

    #[instrument(skip_all, name = "party.service.get_room", fields(room_id = %room_id))]
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomView, PartyError> {
        timed("get_room", async {
            match self.store.load_room(room_id).await? {
                Some(aggregate) if aggregate.is_live() => Ok(aggregate.to_view()),
                _ => Err(PartyError::NotFound("Room not found".to_string())),
            }
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "party.service.join_room",
        fields(room_id = %room_id, user_id = %profile.user_id)
    )]
    pub async fn join_room(
        &self,
        room_id: RoomId,
        profile: &UserProfile,
    ) -> Result<RoomView, PartyError> {
        timed("join_room", async {
            let room = self.registry.room(room_id).await?;
            room.join(profile.clone()).await
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "party.service.leave_room",
        fields(room_id = %room_id, user_id = %user_id)
    )]
    pub async fn leave_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), PartyError> {
        timed("leave_room", async {
            let room = self.registry.room(room_id).await?;
            room.leave(user_id).await
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "party.service.update_sync",
        fields(room_id = %room_id, user_id = %user_id)
    )]
    pub async fn update_sync(
        &self,
        room_id: RoomId,
        user_id: UserId,
        request: &SyncRequest,
    ) -> Result<(), PartyError> {
        timed("update_sync", async {
            let command = SyncCommand::new(request.current_time, request.is_paused, request.seq)?;
            let room = self.registry.room(room_id).await?;
            room.update_sync(user_id, command).await
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "party.service.delete_room",
        fields(room_id = %room_id, user_id = %user_id)
    )]
    pub async fn delete_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), PartyError> {
        timed("delete_room", async {
            let room = self.registry.room(room_id).await?;
            room.delete(user_id).await?;
            info!(
                target: "party.service",
                room_id = %room_id,
                user_id = %user_id,
                "Room deleted"
            );
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, name = "party.service.list_messages", fields(room_id = %room_id))]
    pub async fn list_messages(
        &self,
        room_id: RoomId,
        query: &ListMessagesQuery,
    ) -> Result<Vec<SystemMessage>, PartyError> {
        timed("list_messages", async {
            let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
            if !(1..=MAX_MESSAGE_LIMIT).contains(&limit) {
                return Err(PartyError::BadRequest(format!(
                    "limit must be between 1 and {MAX_MESSAGE_LIMIT}"
                )));
            }
            match self.store.load_room(room_id).await? {
                Some(aggregate) if aggregate.is_live() => {}
                _ => return Err(PartyError::NotFound("Room not found".to_string())),
            }
            self.store.list_messages(room_id, limit).await
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "party.service.subscribe",
        fields(room_id = %room_id, user_id = %user_id)
    )]
    pub async fn subscribe(
        &self,
        room_id: RoomId,
        user_id: UserId,
        sink: Box<dyn EventSink>,
    ) -> Result<Subscription, PartyError> {
        timed("subscribe", async {
            let room = self.registry.room(room_id).await?;
            let subscribed = room.subscribe(user_id, sink).await?;
            Ok(Subscription {
                connection_id: subscribed.connection_id,
                view: subscribed.view,
                room,
            })
        })
        .await
    }

    /// Readiness: the store answers and the registry still routes.
    pub async fn ready(&self) -> Result<(), PartyError> {
        self.store.ping().await?;
        let status = self.registry.status().await?;
        if !status.accepting_new {
            return Err(PartyError::ServiceUnavailable(
                "Service is shutting down".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run `operation` and record its outcome and duration.
async fn timed<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, PartyError>>,
) -> Result<T, PartyError> {
    let start = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.error_code(),
    };
    record_room_operation(operation, status, start.elapsed());
    result
}

