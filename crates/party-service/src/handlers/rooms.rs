//! Room handlers.
//!
//! - `POST /v1/rooms` - create a room, caller becomes host
//! - `GET /v1/rooms` - list live rooms
//! - `GET /v1/rooms/{room_id}` - room view
//! - `DELETE /v1/rooms/{room_id}` - end a room (host only)
//! - `POST /v1/rooms/{room_id}/join` - join
//! - `POST /v1/rooms/{room_id}/leave` - leave
//! - `PUT /v1/rooms/{room_id}/sync` - playback update (host only)
//! - `GET /v1/rooms/{room_id}/messages` - audit trail
//!
//! All routes sit behind `require_auth`; the caller is the
//! [`UserProfile`] it stores in extensions. Bodies are parsed by hand so
//! malformed JSON is a 400 with the service's error shape.

use crate::errors::PartyError;
use crate::identity::UserProfile;
use crate::models::{
    CreateRoomRequest, ListMessagesQuery, ListMessagesResponse, ListRoomsQuery,
    ListRoomsResponse, RoomView, SyncRequest,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::RoomId;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{instrument, Span};

/// Parse a room id path segment.
pub(crate) fn parse_room_id(raw: &str) -> Result<RoomId, PartyError> {
    raw.parse()
        .map_err(|_| PartyError::BadRequest("Invalid room id".to_string()))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, PartyError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "party.handlers.rooms", error = %e, "Invalid request body");
        PartyError::BadRequest("Invalid request body".to_string())
    })
}

fn query_or_bad_request<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, PartyError> {
    query.map(|Query(q)| q).map_err(|e| {
        tracing::debug!(target: "party.handlers.rooms", error = %e, "Invalid query string");
        PartyError::BadRequest("Invalid query parameters".to_string())
    })
}

fn record_status<T>(result: &Result<T, PartyError>, ok: StatusCode) {
    let status = match result {
        Ok(_) => ok.as_u16(),
        Err(e) => e.status_code(),
    };
    Span::current().record("status", status);
}

/// Handler for POST /v1/rooms
///
/// # Response
///
/// - 201 Created: the new room's view, caller is host
/// - 400 Bad Request: invalid body or settings
/// - 404 Not Found: `videoRef` unknown to the catalog
#[instrument(
    skip_all,
    name = "party.room.create",
    fields(method = "POST", endpoint = "/v1/rooms", status = tracing::field::Empty)
)]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserProfile>,
    body: Bytes,
) -> Result<(StatusCode, Json<RoomView>), PartyError> {
    let result = async {
        let request: CreateRoomRequest = parse_body(&body)?;
        state.service.create_room(&caller, &request).await
    }
    .await;
    record_status(&result, StatusCode::CREATED);
    result.map(|view| (StatusCode::CREATED, Json(view)))
}

#[instrument(
    skip_all,
    name = "party.room.list",
    fields(method = "GET", endpoint = "/v1/rooms", status = tracing::field::Empty)
)]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListRoomsQuery>, QueryRejection>,
) -> Result<Json<ListRoomsResponse>, PartyError> {
    let result = async {
        let query = query_or_bad_request(query)?;
        state.service.list_rooms(&query).await
    }
    .await;
    record_status(&result, StatusCode::OK);
    result.map(Json)
}

#[instrument(
    skip_all,
    name = "party.room.get",
    fields(method = "GET", endpoint = "/v1/rooms/{room_id}", status = tracing::field::Empty)
)]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>, PartyError> {
    let result = async { state.service.get_room(parse_room_id(&room_id)?).await }.await;
    record_status(&result, StatusCode::OK);
    result.map(Json)
}

/// Handler for DELETE /v1/rooms/{room_id}
///
/// # Response
///
/// - 204 No Content: room ended
/// - 403 Forbidden: caller is not the current host
/// - 404 Not Found: room unknown or already ended
#[instrument(
    skip_all,
    name = "party.room.delete",
    fields(method = "DELETE", endpoint = "/v1/rooms/{room_id}", status = tracing::field::Empty)
)]
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserProfile>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, PartyError> {
    let result = async {
        state
            .service
            .delete_room(parse_room_id(&room_id)?, caller.user_id)
            .await
    }
    .await;
    record_status(&result, StatusCode::NO_CONTENT);
    result.map(|()| StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/rooms/{room_id}/join
///
/// # Response
///
/// - 200 OK: refreshed room view
/// - 404 Not Found: room not live
/// - 409 Conflict: room full, or caller already an active participant
#[instrument(
    skip_all,
    name = "party.room.join",
    fields(method = "POST", endpoint = "/v1/rooms/{room_id}/join", status = tracing::field::Empty)
)]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserProfile>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>, PartyError> {
    let result = async {
        state
            .service
            .join_room(parse_room_id(&room_id)?, &caller)
            .await
    }
    .await;
    record_status(&result, StatusCode::OK);
    result.map(Json)
}

#[instrument(
    skip_all,
    name = "party.room.leave",
    fields(method = "POST", endpoint = "/v1/rooms/{room_id}/leave", status = tracing::field::Empty)
)]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserProfile>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, PartyError> {
    let result = async {
        state
            .service
            .leave_room(parse_room_id(&room_id)?, caller.user_id)
            .await
    }
    .await;
    record_status(&result, StatusCode::NO_CONTENT);
    result.map(|()| StatusCode::NO_CONTENT)
}

/// Handler for PUT /v1/rooms/{room_id}/sync
///
/// # Response
///
/// - 204 No Content: update applied and broadcast
/// - 400 Bad Request: invalid body or negative time
/// - 403 Forbidden: caller is not the current host
/// - 409 Conflict: `seq` already superseded
#[instrument(
    skip_all,
    name = "party.room.sync",
    fields(method = "PUT", endpoint = "/v1/rooms/{room_id}/sync", status = tracing::field::Empty)
)]
pub async fn update_sync(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserProfile>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, PartyError> {
    let result = async {
        let room_id = parse_room_id(&room_id)?;
        let request: SyncRequest = parse_body(&body)?;
        state
            .service
            .update_sync(room_id, caller.user_id, &request)
            .await
    }
    .await;
    record_status(&result, StatusCode::NO_CONTENT);
    result.map(|()| StatusCode::NO_CONTENT)
}

#[instrument(
    skip_all,
    name = "party.room.messages",
    fields(
        method = "GET",
        endpoint = "/v1/rooms/{room_id}/messages",
        status = tracing::field::Empty
    )
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Result<Json<ListMessagesResponse>, PartyError> {
    let result = async {
        let room_id = parse_room_id(&room_id)?;
        let query = query_or_bad_request(query)?;
        state.service.list_messages(room_id, &query).await
    }
    .await;
    record_status(&result, StatusCode::OK);
    result.map(|messages| Json(ListMessagesResponse { messages }))
}
