//! `RoomRegistryActor`: singleton supervisor for room actors.
//!
//! - Maps `RoomId` to the room's actor, spawning one on first use
//! - Owns the root `CancellationToken`
//! - Reaps room actors that finished (drained, or panicked)
//!
//! The registry holds no room state. It only routes, so a request for a
//! room whose actor is draining reaches that actor and gets its `NotFound`.
//!
//! # Graceful Shutdown
//!
//! `shutdown` stops handing out room actors (new requests get
//! `ServiceUnavailable`), cancels every room and waits up to the deadline
//! for each to close its subscribers.

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomActorSettings};
use crate::errors::PartyError;
use crate::store::RoomStore;
use common::types::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How often finished room actors are reaped.
const ROOM_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline for rooms to stop when the registry itself is cancelled.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Handle to the `RoomRegistryActor`.
#[derive(Debug, Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Spawn the registry and return a handle to it.
    #[must_use]
    pub fn new(
        store: Arc<dyn RoomStore>,
        settings: RoomActorSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            store,
            settings,
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| PartyError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))
    }

    /// The actor for `room_id`, spawned if necessary.
    pub async fn room(&self, room_id: RoomId) -> Result<RoomActorHandle, PartyError> {
        self.request(|respond_to| RegistryMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn status(&self) -> Result<RegistryStatus, PartyError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop routing to rooms and wait up to `deadline` for them to close.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PartyError> {
        self.request(|respond_to| RegistryMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

pub struct RoomRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token; every room token is a child.
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    store: Arc<dyn RoomStore>,
    settings: RoomActorSettings,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    #[instrument(skip_all, name = "party.actor.registry")]
    async fn run(mut self) {
        info!(target: "party.actor.registry", "RoomRegistryActor started");

        let mut health_check = tokio::time::interval(ROOM_HEALTH_INTERVAL);
        health_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "party.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.stop_rooms(DEFAULT_SHUTDOWN_DEADLINE).await;
                    break;
                }

                _ = health_check.tick() => {
                    self.check_room_health().await;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(
                            target: "party.actor.registry",
                            "RoomRegistryActor channel closed, exiting"
                        );
                        break;
                    };
                    self.handle_message(message).await;
                    self.mailbox.observe(self.receiver.len());
                }
            }
        }

        info!(
            target: "party.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_room(room_id).await;
                let _ = respond_to.send(result);
            }
            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.stop_rooms(deadline).await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    async fn get_room(&mut self, room_id: RoomId) -> Result<RoomActorHandle, PartyError> {
        if !self.accepting_new {
            return Err(PartyError::ServiceUnavailable(
                "Service is shutting down".to_string(),
            ));
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if !managed.task_handle.is_finished() && !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
        }
        if let Some(stale) = self.rooms.remove(&room_id) {
            let metrics = Arc::clone(&self.metrics);
            if stale.task_handle.is_finished() {
                reap(room_id, stale, metrics).await;
            } else {
                // Still closing its subscribers; let it finish off the loop.
                tokio::spawn(reap(room_id, stale, metrics));
            }
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id,
            Arc::clone(&self.store),
            self.settings,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.metrics.room_spawned();
        debug!(
            target: "party.actor.registry",
            room_id = %room_id,
            rooms = self.rooms.len() + 1,
            "Room actor spawned"
        );

        self.rooms.insert(
            room_id,
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        Ok(handle)
    }

    fn status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.active_connections(),
            accepting_new: self.accepting_new,
        }
    }

    async fn stop_rooms(&mut self, deadline: Duration) {
        self.accepting_new = false;
        info!(
            target: "party.actor.registry",
            room_count = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Stopping room actors"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(deadline, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    target: "party.actor.registry",
                    room_id = %room_id,
                    error = ?e,
                    "Room actor task failed during shutdown"
                ),
                Err(_) => warn!(
                    target: "party.actor.registry",
                    room_id = %room_id,
                    "Room actor shutdown timed out"
                ),
            }
            self.metrics.room_removed();
        }
    }

    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for room_id in finished {
            if let Some(managed) = self.rooms.remove(&room_id) {
                reap(room_id, managed, Arc::clone(&self.metrics)).await;
            }
        }
    }
}

async fn reap(room_id: RoomId, managed: ManagedRoom, metrics: Arc<ActorMetrics>) {
    match managed.task_handle.await {
        Ok(()) => debug!(
            target: "party.actor.registry",
            room_id = %room_id,
            "Room actor exited"
        ),
        Err(join_error) if join_error.is_panic() => {
            error!(
                target: "party.actor.registry",
                room_id = %room_id,
                error = ?join_error,
                "Room actor panicked"
            );
            metrics.record_panic(ActorType::Room);
        }
        Err(_) => {}
    }
    metrics.room_removed();
}
