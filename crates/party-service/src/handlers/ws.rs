//! WebSocket push channel: `GET /v1/rooms/{room_id}/ws?token=...`
//!
//! Browsers cannot set headers on a WebSocket handshake, so the bearer
//! token travels in the query string. The caller must be an active
//! participant; their connection then receives every event the room
//! publishes, starting with a `room.snapshot`.
//!
//! Client frames:
//!
//! - `{"type":"sync","currentTime":120.0,"isPaused":true,"seq":7}`
//! - `{"type":"leave"}`
//!
//! A rejected frame is answered with
//! `{"type":"error","code":"FORBIDDEN","message":"..."}` on the same socket.
//! Dropping the socket without a `leave` starts the disconnect grace period.

use crate::actors::EventSink;
use crate::errors::PartyError;
use crate::handlers::rooms::parse_room_id;
use crate::identity::UserProfile;
use crate::models::{RoomEvent, SyncRequest};
use crate::routes::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use common::secret::SecretString;
use common::types::RoomId;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// Frames a subscriber may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Sync(SyncRequest),
    Leave,
}

#[derive(Debug, Serialize)]
struct ErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'a str,
    message: String,
}

type SocketWriter = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Write half of the socket, shared between the connection actor (events)
/// and the reader (error replies).
struct WebSocketSink {
    writer: SocketWriter,
}

#[async_trait]
impl EventSink for WebSocketSink {
    async fn send(&mut self, event: &RoomEvent) -> Result<(), PartyError> {
        let text = serde_json::to_string(event)
            .map_err(|e| PartyError::Internal(format!("event encoding failed: {e}")))?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| PartyError::Internal(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.close().await;
    }
}

/// Handler for GET /v1/rooms/{room_id}/ws
///
/// # Response
///
/// - 101 Switching Protocols: subscribed
/// - 401 Unauthorized: missing or unknown token
/// - 403 Forbidden: caller is not an active participant
/// - 404 Not Found: room not live
#[instrument(
    skip_all,
    name = "party.room.socket",
    fields(room_id = tracing::field::Empty, user_id = tracing::field::Empty)
)]
pub async fn room_socket(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    query: Result<Query<SocketQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Result<Response, PartyError> {
    let room_id = parse_room_id(&room_id)?;
    tracing::Span::current().record("room_id", tracing::field::display(room_id));

    let token = query
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| PartyError::Unauthorized("Missing token".to_string()))?;
    let caller = state
        .identity
        .authenticate(&SecretString::from(token))
        .await?;
    tracing::Span::current().record("user_id", tracing::field::display(caller.user_id));

    // Reject the common cases as plain HTTP errors before upgrading. The
    // room re-checks membership when the subscription is registered.
    let view = state.service.get_room(room_id).await?;
    if !view.participants.iter().any(|p| p.user_id == caller.user_id) {
        return Err(PartyError::Forbidden(
            "Only active participants can subscribe".to_string(),
        ));
    }

    Ok(ws.on_upgrade(move |socket| serve_socket(state, room_id, caller, socket)))
}

async fn serve_socket(
    state: Arc<AppState>,
    room_id: RoomId,
    caller: UserProfile,
    socket: WebSocket,
) {
    let (writer, mut reader) = socket.split();
    let writer: SocketWriter = Arc::new(Mutex::new(writer));
    let sink = Box::new(WebSocketSink {
        writer: Arc::clone(&writer),
    });

    let subscription = match state.service.subscribe(room_id, caller.user_id, sink).await {
        Ok(subscription) => subscription,
        Err(e) => {
            debug!(
                target: "party.handlers.ws",
                room_id = %room_id,
                user_id = %caller.user_id,
                error = %e,
                "Subscription rejected after upgrade"
            );
            send_error(&writer, &e).await;
            let _ = writer.lock().await.close().await;
            return;
        }
    };
    info!(
        target: "party.handlers.ws",
        room_id = %room_id,
        user_id = %caller.user_id,
        connection_id = %subscription.connection_id,
        "WebSocket subscribed"
    );

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if !handle_frame(&state, room_id, &caller, &text, &writer).await {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    target: "party.handlers.ws",
                    room_id = %room_id,
                    error = %e,
                    "WebSocket read failed"
                );
                break;
            }
        }
    }

    debug!(
        target: "party.handlers.ws",
        room_id = %room_id,
        user_id = %caller.user_id,
        connection_id = %subscription.connection_id,
        "WebSocket reader finished"
    );
    subscription.close().await;
}

/// Route one client frame. Returns `false` when the socket should stop
/// reading.
async fn handle_frame(
    state: &AppState,
    room_id: RoomId,
    caller: &UserProfile,
    text: &str,
    writer: &SocketWriter,
) -> bool {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(target: "party.handlers.ws", error = %e, "Invalid client frame");
            send_error(writer, &PartyError::BadRequest("Invalid frame".to_string())).await;
            return true;
        }
    };

    match frame {
        ClientFrame::Sync(request) => {
            if let Err(e) = state
                .service
                .update_sync(room_id, caller.user_id, &request)
                .await
            {
                send_error(writer, &e).await;
            }
            true
        }
        ClientFrame::Leave => match state.service.leave_room(room_id, caller.user_id).await {
            Ok(()) => false,
            Err(e) => {
                send_error(writer, &e).await;
                true
            }
        },
    }
}

async fn send_error(writer: &SocketWriter, error: &PartyError) {
    let frame = ErrorFrame {
        kind: "error",
        code: error.error_code(),
        message: error.client_message(),
    };
    let Ok(text) = serde_json::to_string(&frame) else {
        return;
    };
    if let Err(e) = writer.lock().await.send(Message::Text(text)).await {
        warn!(target: "party.handlers.ws", error = %e, "Failed to send error frame");
    }
}
