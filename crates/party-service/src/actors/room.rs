//! `RoomActor`: the single writer for one room.
//!
//! Every mutation of a room (join, leave, host transfer, sync, delete,
//! grace-period expiry) is a message handled here, one at a time. The actor
//! computes a [`Transition`] against its aggregate, commits it through the
//! store, and only after the commit succeeds adopts the new aggregate and
//! publishes the transition's events. A failed commit leaves both the store
//! and the actor's view untouched.
//!
//! # Lifecycle
//!
//! The registry spawns the actor on first use. The actor loads its aggregate
//! lazily; a room that does not exist (or has ended) answers `NotFound` and
//! the actor exits after the drain period. Once a live room ends, the actor
//! keeps answering `NotFound` for the drain period, then closes every
//! subscriber and exits.

use super::broadcast::EventBroadcaster;
use super::connection::EventSink;
use super::messages::{ConnectionId, RoomActorState, RoomMessage, Subscribed};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::catalog::VideoInfo;
use crate::errors::PartyError;
use crate::identity::UserProfile;
use crate::lifecycle::{self, RoomSettings};
use crate::membership::{self, LeaveReason};
use crate::models::{RoomAggregate, RoomView};
use crate::observability::metrics as prom;
use crate::playback::{self, SyncCommand};
use crate::store::RoomStore;
use crate::transition::Transition;
use chrono::Utc;
use common::types::{RoomId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const ROOM_CHANNEL_BUFFER: usize = 500;

/// How often finished connection actors are reaped.
const CONNECTION_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Timing knobs shared by every room actor.
#[derive(Debug, Clone, Copy)]
pub struct RoomActorSettings {
    pub grace_period: Duration,
    pub drain_period: Duration,
    pub queue_capacity: usize,
}

fn room_gone() -> PartyError {
    PartyError::NotFound("Room not found".to_string())
}

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Send a request and wait for the reply.
    ///
    /// An actor that has already exited means the room is gone.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(build(tx)).await.map_err(|_| room_gone())?;
        rx.await.map_err(|_| room_gone())
    }

    pub async fn create(
        &self,
        settings: RoomSettings,
        video: VideoInfo,
        host: UserProfile,
    ) -> Result<RoomView, PartyError> {
        self.request(|respond_to| RoomMessage::Create {
            settings,
            video,
            host,
            respond_to,
        })
        .await?
    }

    pub async fn join(&self, profile: UserProfile) -> Result<RoomView, PartyError> {
        self.request(|respond_to| RoomMessage::Join {
            profile,
            respond_to,
        })
        .await?
    }

    pub async fn leave(&self, user_id: UserId) -> Result<(), PartyError> {
        self.request(|respond_to| RoomMessage::Leave {
            user_id,
            respond_to,
        })
        .await?
    }

    pub async fn update_sync(
        &self,
        user_id: UserId,
        command: SyncCommand,
    ) -> Result<(), PartyError> {
        self.request(|respond_to| RoomMessage::Sync {
            user_id,
            command,
            respond_to,
        })
        .await?
    }

    pub async fn delete(&self, user_id: UserId) -> Result<(), PartyError> {
        self.request(|respond_to| RoomMessage::Delete {
            user_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_view(&self) -> Result<RoomView, PartyError> {
        self.request(|respond_to| RoomMessage::GetView { respond_to })
            .await?
    }

    pub async fn subscribe(
        &self,
        user_id: UserId,
        sink: Box<dyn EventSink>,
    ) -> Result<Subscribed, PartyError> {
        self.request(|respond_to| RoomMessage::Subscribe {
            user_id,
            sink,
            respond_to,
        })
        .await?
    }

    /// Report that a subscriber's transport closed.
    pub async fn connection_closed(&self, connection_id: ConnectionId) {
        let _ = self
            .sender
            .send(RoomMessage::ConnectionClosed { connection_id })
            .await;
    }

    pub async fn get_state(&self) -> Result<RoomActorState, PartyError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// True once the actor has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn RoomStore>,
    settings: RoomActorSettings,
    /// Whether the store has been consulted yet.
    loaded: bool,
    aggregate: Option<RoomAggregate>,
    /// Highest client sequence accepted from the current host.
    last_client_seq: Option<u64>,
    /// Set when the actor should exit.
    drain_deadline: Option<Instant>,
    broadcaster: EventBroadcaster,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    pub fn spawn(
        room_id: RoomId,
        store: Arc<dyn RoomStore>,
        settings: RoomActorSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let broadcaster = EventBroadcaster::new(
            room_id,
            sender.downgrade(),
            settings.grace_period,
            settings.queue_capacity,
            cancel_token.child_token(),
            metrics,
        );

        let actor = Self {
            room_id,
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            settings,
            loaded: false,
            aggregate: None,
            last_client_seq: None,
            drain_deadline: None,
            broadcaster,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "party.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        debug!(target: "party.actor.room", room_id = %self.room_id, "RoomActor started");

        let mut health_check = tokio::time::interval(CONNECTION_HEALTH_INTERVAL);
        health_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.drain_deadline;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "party.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    debug!(
                        target: "party.actor.room",
                        room_id = %self.room_id,
                        "Drain period elapsed"
                    );
                    break;
                }

                _ = health_check.tick() => {
                    self.check_connection_health().await;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    self.handle_message(message).await;
                    self.mailbox.observe(self.receiver.len());
                }
            }
        }

        self.receiver.close();
        self.broadcaster.close_all().await;

        info!(
            target: "party.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Create {
                settings,
                video,
                host,
                respond_to,
            } => {
                let result = self.handle_create(settings, &video, &host).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Join {
                profile,
                respond_to,
            } => {
                let result = self.handle_join(&profile).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Leave {
                user_id,
                respond_to,
            } => {
                let result = self.handle_leave(user_id).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Sync {
                user_id,
                command,
                respond_to,
            } => {
                let result = self.handle_sync(user_id, command).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Delete {
                user_id,
                respond_to,
            } => {
                let result = self.handle_delete(user_id).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::GetView { respond_to } => {
                let result = match self.ensure_loaded().await {
                    Ok(()) => self.live_aggregate().map(RoomAggregate::to_view),
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }
            RoomMessage::Subscribe {
                user_id,
                sink,
                respond_to,
            } => {
                let result = self.handle_subscribe(user_id, sink).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::ConnectionClosed { connection_id } => {
                if let Some(user_id) = self.broadcaster.remove_connection(connection_id) {
                    self.start_grace_if_disconnected(user_id);
                }
            }
            RoomMessage::GraceExpired { user_id, timer_id } => {
                self.handle_grace_expired(user_id, timer_id).await;
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    async fn handle_create(
        &mut self,
        settings: RoomSettings,
        video: &VideoInfo,
        host: &UserProfile,
    ) -> Result<RoomView, PartyError> {
        let result = self.create_aggregate(settings, video, host).await;
        if result.is_err() && self.aggregate.is_none() {
            // Nobody learned this room id, so nothing else will arm the drain.
            self.drain_deadline = Some(Instant::now() + self.settings.drain_period);
        }
        result?;
        self.drain_deadline = None;

        info!(
            target: "party.actor.room",
            room_id = %self.room_id,
            host_id = %host.user_id,
            "Room created"
        );
        self.live_aggregate().map(RoomAggregate::to_view)
    }

    async fn create_aggregate(
        &mut self,
        settings: RoomSettings,
        video: &VideoInfo,
        host: &UserProfile,
    ) -> Result<(), PartyError> {
        self.ensure_loaded().await?;
        if self.aggregate.is_some() {
            return Err(PartyError::Conflict("Room already exists".to_string()));
        }

        let transition = lifecycle::create(self.room_id, settings, video, host, Utc::now());
        self.apply(transition).await
    }

    async fn handle_join(&mut self, profile: &UserProfile) -> Result<RoomView, PartyError> {
        self.ensure_loaded().await?;
        let transition = membership::join(self.live_aggregate()?, profile, Utc::now())?;
        self.apply(transition).await?;

        debug!(
            target: "party.actor.room",
            room_id = %self.room_id,
            user_id = %profile.user_id,
            "Participant joined"
        );
        self.live_aggregate().map(RoomAggregate::to_view)
    }

    async fn handle_leave(&mut self, user_id: UserId) -> Result<(), PartyError> {
        self.ensure_loaded().await?;
        let transition = membership::leave(
            self.live_aggregate()?,
            user_id,
            LeaveReason::Voluntary,
            Utc::now(),
        )?;
        self.apply(transition).await?;
        self.broadcaster.disconnect_user(user_id);

        debug!(
            target: "party.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            reason = LeaveReason::Voluntary.as_str(),
            "Participant left"
        );
        Ok(())
    }

    async fn handle_sync(
        &mut self,
        user_id: UserId,
        command: SyncCommand,
    ) -> Result<(), PartyError> {
        let result = self.apply_sync(user_id, command).await;
        let outcome = match &result {
            Ok(()) => "applied",
            Err(PartyError::Forbidden(_)) => "forbidden",
            Err(PartyError::Conflict(_)) => "superseded",
            Err(PartyError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        prom::record_sync_update(outcome);
        result
    }

    async fn apply_sync(
        &mut self,
        user_id: UserId,
        command: SyncCommand,
    ) -> Result<(), PartyError> {
        self.ensure_loaded().await?;
        let last_client_seq = self.last_client_seq;
        let transition = playback::apply_sync(
            self.live_aggregate()?,
            user_id,
            command,
            last_client_seq,
            Utc::now(),
        )?;
        self.apply(transition).await?;
        if command.client_seq.is_some() {
            self.last_client_seq = command.client_seq;
        }
        Ok(())
    }

    async fn handle_delete(&mut self, user_id: UserId) -> Result<(), PartyError> {
        self.ensure_loaded().await?;
        let transition = lifecycle::delete(self.live_aggregate()?, user_id, Utc::now())?;
        self.apply(transition).await
    }

    async fn handle_subscribe(
        &mut self,
        user_id: UserId,
        sink: Box<dyn EventSink>,
    ) -> Result<Subscribed, PartyError> {
        self.ensure_loaded().await?;
        let aggregate = self.live_aggregate()?;
        if aggregate.active_participant(user_id).is_none() {
            return Err(PartyError::Forbidden(
                "Only active participants can subscribe".to_string(),
            ));
        }
        let view = aggregate.to_view();
        let connection_id = self.broadcaster.subscribe(user_id, sink);
        self.broadcaster.greet(connection_id, view.clone());

        debug!(
            target: "party.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            connection_id = %connection_id,
            subscribers = self.broadcaster.subscriber_count(),
            "Subscriber attached"
        );
        Ok(Subscribed {
            connection_id,
            view,
        })
    }

    async fn handle_grace_expired(&mut self, user_id: UserId, timer_id: u64) {
        if !self.broadcaster.take_expired(user_id, timer_id)
            || self.broadcaster.has_connection(user_id)
        {
            return;
        }
        let still_member = self
            .aggregate
            .as_ref()
            .is_some_and(|agg| agg.is_live() && agg.active_participant(user_id).is_some());
        if !still_member {
            return;
        }

        let transition = match self.live_aggregate().and_then(|agg| {
            membership::leave(agg, user_id, LeaveReason::Disconnected, Utc::now())
        }) {
            Ok(transition) => transition,
            Err(e) => {
                debug!(
                    target: "party.actor.room",
                    room_id = %self.room_id,
                    user_id = %user_id,
                    error = %e,
                    "Grace expiry skipped"
                );
                return;
            }
        };

        match self.apply(transition).await {
            Ok(()) => {
                prom::record_grace_expiration();
                info!(
                    target: "party.actor.room",
                    room_id = %self.room_id,
                    user_id = %user_id,
                    reason = LeaveReason::Disconnected.as_str(),
                    "Grace period expired, participant removed"
                );
            }
            Err(e) => {
                warn!(
                    target: "party.actor.room",
                    room_id = %self.room_id,
                    user_id = %user_id,
                    error = %e,
                    "Grace expiry commit failed, rescheduling"
                );
                self.broadcaster.schedule_grace(user_id);
            }
        }
    }

    /// Load the aggregate on first use.
    async fn ensure_loaded(&mut self) -> Result<(), PartyError> {
        if self.loaded {
            return Ok(());
        }
        let aggregate = self.store.load_room(self.room_id).await?;
        self.loaded = true;
        self.aggregate = aggregate;
        Ok(())
    }

    /// The aggregate if the room is live; otherwise `NotFound`, arming the
    /// drain deadline so the actor winds down.
    fn live_aggregate(&mut self) -> Result<&RoomAggregate, PartyError> {
        if !self.aggregate.as_ref().is_some_and(RoomAggregate::is_live) {
            if self.drain_deadline.is_none() {
                self.drain_deadline = Some(Instant::now() + self.settings.drain_period);
            }
            return Err(room_gone());
        }
        self.aggregate.as_ref().ok_or_else(room_gone)
    }

    /// Commit, then adopt the new aggregate and publish its events.
    async fn apply(&mut self, transition: Transition) -> Result<(), PartyError> {
        self.commit(&transition).await?;

        let Transition { next, events, .. } = transition;
        let previous_host = self.aggregate.as_ref().map(|agg| agg.room.host_id);
        if previous_host != Some(next.room.host_id) {
            self.last_client_seq = None;
        }
        let ended = !next.is_live();
        self.aggregate = Some(next);

        for event in events {
            self.broadcaster.publish(event);
        }

        if ended {
            self.broadcaster.cancel_all_grace();
            self.drain_deadline = Some(Instant::now() + self.settings.drain_period);
            info!(
                target: "party.actor.room",
                room_id = %self.room_id,
                drain_secs = self.settings.drain_period.as_secs(),
                "Room ended"
            );
        }
        Ok(())
    }

    /// Commit through the store. Critical transitions get one retry on a
    /// transient store error.
    async fn commit(&self, transition: &Transition) -> Result<(), PartyError> {
        let first_error = match self.store.commit(&transition.commit).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !(transition.critical && first_error.is_transient()) {
            return Err(first_error);
        }

        warn!(
            target: "party.actor.room",
            room_id = %self.room_id,
            error = %first_error,
            "Critical commit failed, retrying"
        );
        match self.store.commit(&transition.commit).await {
            Ok(()) => {
                prom::record_critical_retry("recovered");
                Ok(())
            }
            Err(e) => {
                prom::record_critical_retry("failed");
                error!(
                    target: "party.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Critical commit failed after retry, room unchanged"
                );
                Err(PartyError::Internal(format!(
                    "critical room commit failed after retry: {e}"
                )))
            }
        }
    }

    fn start_grace_if_disconnected(&mut self, user_id: UserId) {
        let member = self
            .aggregate
            .as_ref()
            .is_some_and(|agg| agg.is_live() && agg.active_participant(user_id).is_some());
        if member && !self.broadcaster.has_connection(user_id) {
            self.broadcaster.schedule_grace(user_id);
        }
    }

    async fn check_connection_health(&mut self) {
        for user_id in self.broadcaster.reap_finished().await {
            self.start_grace_if_disconnected(user_id);
        }
    }

    fn state(&self) -> RoomActorState {
        RoomActorState {
            room_id: self.room_id,
            view: self.aggregate.as_ref().map(RoomAggregate::to_view),
            subscribers: self.broadcaster.subscriber_count(),
            pending_grace_timers: self.broadcaster.pending_grace_timers(),
            next_event_seq: self.broadcaster.next_seq(),
            draining: self.drain_deadline.is_some(),
        }
    }
}
