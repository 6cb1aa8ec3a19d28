//! Per-room fan-out and disconnect grace timers.
//!
//! Owned by the room actor. `publish` stamps the room's event counter and
//! hands the event to every subscriber's outbound queue without waiting on
//! any of them.

use super::connection::{
    ConnectionActor, ConnectionActorHandle, ConnectionContext, Delivery, EventSink,
};
use super::messages::{ConnectionId, RoomMessage};
use super::metrics::{ActorMetrics, ActorType};
use crate::models::{RoomEvent, RoomEventKind, RoomView};
use crate::observability::metrics as prom;
use common::types::{RoomId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time allowed for each connection to exit during teardown.
const CONNECTION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct ManagedConnection {
    handle: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
}

struct GraceTimer {
    timer_id: u64,
    cancel_token: CancellationToken,
}

pub struct EventBroadcaster {
    room_id: RoomId,
    next_seq: u64,
    connections: HashMap<ConnectionId, ManagedConnection>,
    grace_timers: HashMap<UserId, GraceTimer>,
    next_timer_id: u64,
    grace_period: Duration,
    context: ConnectionContext,
    /// Parent of every connection token and grace timer token.
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl EventBroadcaster {
    pub fn new(
        room_id: RoomId,
        room: mpsc::WeakSender<RoomMessage>,
        grace_period: Duration,
        queue_capacity: usize,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            room_id,
            next_seq: 1,
            connections: HashMap::new(),
            grace_timers: HashMap::new(),
            next_timer_id: 1,
            grace_period,
            context: ConnectionContext {
                room_id,
                room,
                queue_capacity,
                metrics: Arc::clone(&metrics),
            },
            cancel_token,
            metrics,
        }
    }

    /// Attach a subscriber for `user_id` and cancel any pending grace timer.
    pub fn subscribe(&mut self, user_id: UserId, sink: Box<dyn EventSink>) -> ConnectionId {
        if self.cancel_grace(user_id) {
            debug!(
                target: "party.actor.broadcast",
                room_id = %self.room_id,
                user_id = %user_id,
                "Resubscribed within grace period"
            );
        }

        let (handle, task_handle) =
            ConnectionActor::spawn(user_id, sink, &self.context, self.cancel_token.child_token());
        let connection_id = handle.connection_id();
        self.connections.insert(
            connection_id,
            ManagedConnection {
                handle,
                task_handle,
            },
        );
        connection_id
    }

    /// Queue a snapshot of `view` for one new subscriber.
    ///
    /// Does not advance the counter, so the subscriber can tell which
    /// published events its snapshot already reflects.
    pub fn greet(&self, connection_id: ConnectionId, view: RoomView) {
        let Some(managed) = self.connections.get(&connection_id) else {
            return;
        };
        let mut snapshot = RoomEvent::with_view(RoomEventKind::Snapshot, view);
        snapshot.seq = self.next_seq.saturating_sub(1);
        managed.handle.deliver(snapshot);
    }

    /// Stamp `event` with the next sequence number and fan it out.
    pub fn publish(&mut self, mut event: RoomEvent) {
        event.seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);

        let mut delivered = 0usize;
        for (connection_id, managed) in &self.connections {
            match managed.handle.deliver(event.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::DroppedOldest => {
                    delivered += 1;
                    self.metrics.record_event_dropped();
                    warn!(
                        target: "party.actor.broadcast",
                        room_id = %self.room_id,
                        connection_id = %connection_id,
                        "Subscriber queue full, dropped oldest event"
                    );
                }
                Delivery::Closed => {}
            }
        }

        prom::record_broadcast(event.event.as_str(), delivered);
        debug!(
            target: "party.actor.broadcast",
            room_id = %self.room_id,
            event = event.event.as_str(),
            seq = event.seq,
            subscribers = delivered,
            "Event published"
        );
    }

    /// Forget a connection. Returns its user if it was still registered.
    pub fn remove_connection(&mut self, connection_id: ConnectionId) -> Option<UserId> {
        let managed = self.connections.remove(&connection_id)?;
        managed.handle.close();
        Some(managed.handle.user_id())
    }

    #[must_use]
    pub fn has_connection(&self, user_id: UserId) -> bool {
        self.connections
            .values()
            .any(|m| m.handle.user_id() == user_id && !m.handle.is_cancelled())
    }

    /// Close every connection `user_id` has and drop their grace timer.
    pub fn disconnect_user(&mut self, user_id: UserId) {
        self.cancel_grace(user_id);
        self.connections.retain(|_, managed| {
            if managed.handle.user_id() == user_id {
                managed.handle.close();
                false
            } else {
                true
            }
        });
    }

    /// Start (or restart) the grace timer for `user_id`.
    ///
    /// When it fires the room receives `GraceExpired` carrying the timer id,
    /// so a stale timer that raced a resubscribe is ignored.
    pub fn schedule_grace(&mut self, user_id: UserId) {
        self.cancel_grace(user_id);

        let timer_id = self.next_timer_id;
        self.next_timer_id = self.next_timer_id.saturating_add(1);
        let cancel_token = self.cancel_token.child_token();
        let timer_token = cancel_token.clone();
        let room = self.context.room.clone();
        let grace_period = self.grace_period;

        tokio::spawn(async move {
            tokio::select! {
                () = timer_token.cancelled() => {}
                () = tokio::time::sleep(grace_period) => {
                    if let Some(room) = room.upgrade() {
                        let _ = room.send(RoomMessage::GraceExpired { user_id, timer_id }).await;
                    }
                }
            }
        });

        info!(
            target: "party.actor.broadcast",
            room_id = %self.room_id,
            user_id = %user_id,
            grace_period_secs = grace_period.as_secs(),
            "Subscriber disconnected, grace period started"
        );
        self.grace_timers.insert(
            user_id,
            GraceTimer {
                timer_id,
                cancel_token,
            },
        );
    }

    /// Returns whether a timer was pending.
    pub fn cancel_grace(&mut self, user_id: UserId) -> bool {
        match self.grace_timers.remove(&user_id) {
            Some(timer) => {
                timer.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Claim an expired timer. False when it was cancelled or superseded.
    pub fn take_expired(&mut self, user_id: UserId, timer_id: u64) -> bool {
        if self
            .grace_timers
            .get(&user_id)
            .is_some_and(|timer| timer.timer_id == timer_id)
        {
            self.grace_timers.remove(&user_id);
            true
        } else {
            false
        }
    }

    pub fn cancel_all_grace(&mut self) {
        for (_, timer) in self.grace_timers.drain() {
            timer.cancel_token.cancel();
        }
    }

    /// Reap connection actors that exited on their own.
    ///
    /// Returns the users whose connection went away.
    pub async fn reap_finished(&mut self) -> Vec<UserId> {
        let finished: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let mut users = Vec::with_capacity(finished.len());
        for connection_id in finished {
            let Some(managed) = self.connections.remove(&connection_id) else {
                continue;
            };
            if let Err(join_error) = managed.task_handle.await {
                if join_error.is_panic() {
                    error!(
                        target: "party.actor.broadcast",
                        room_id = %self.room_id,
                        connection_id = %connection_id,
                        error = ?join_error,
                        "Connection actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Connection);
                    self.metrics.connection_closed();
                }
            }
            users.push(managed.handle.user_id());
        }
        users
    }

    /// Close every connection and wait for each to exit.
    pub async fn close_all(&mut self) {
        self.cancel_all_grace();
        let connections: Vec<(ConnectionId, ManagedConnection)> =
            self.connections.drain().collect();
        for (_, managed) in &connections {
            managed.handle.close();
        }

        for (connection_id, managed) in connections {
            match tokio::time::timeout(CONNECTION_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    target: "party.actor.broadcast",
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    error = ?e,
                    "Connection task failed during shutdown"
                ),
                Err(_) => warn!(
                    target: "party.actor.broadcast",
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    "Connection shutdown timed out"
                ),
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn pending_grace_timers(&self) -> usize {
        self.grace_timers.len()
    }

    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::PartyError;
    use crate::models::SyncDelta;
    use async_trait::async_trait;

    use crate::actors::connection::testing::ChannelSink;

    /// Never completes a send.
    struct StalledSink;

    #[async_trait]
    impl EventSink for StalledSink {
        async fn send(&mut self, _event: &RoomEvent) -> Result<(), PartyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn broadcaster(room: &mpsc::Sender<RoomMessage>, capacity: usize) -> EventBroadcaster {
        EventBroadcaster::new(
            RoomId::new(),
            room.downgrade(),
            Duration::from_secs(30),
            capacity,
            CancellationToken::new(),
            ActorMetrics::new(),
        )
    }

    fn sync_event(room_id: RoomId, t: f64) -> RoomEvent {
        RoomEvent::sync(
            room_id,
            SyncDelta {
                current_time: t,
                is_paused: false,
                sync_seq: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_stamps_sequence_and_reaches_all() {
        let (room_tx, _room_rx) = mpsc::channel(8);
        let mut fanout = broadcaster(&room_tx, 16);
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        fanout.subscribe(UserId::new(), Box::new(ChannelSink(a_tx)));
        fanout.subscribe(UserId::new(), Box::new(ChannelSink(b_tx)));

        fanout.publish(sync_event(fanout.room_id, 1.0));
        fanout.publish(sync_event(fanout.room_id, 2.0));

        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(rx.recv().await.unwrap().seq, 1);
            assert_eq!(rx.recv().await.unwrap().seq, 2);
        }
        assert_eq!(fanout.next_seq(), 3);
        fanout.close_all().await;
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        let (room_tx, _room_rx) = mpsc::channel(8);
        let mut fanout = broadcaster(&room_tx, 2);
        let (fast_tx, mut fast_rx) = mpsc::unbounded_channel();
        fanout.subscribe(UserId::new(), Box::new(StalledSink));
        fanout.subscribe(UserId::new(), Box::new(ChannelSink(fast_tx)));

        for i in 0..10 {
            fanout.publish(sync_event(fanout.room_id, f64::from(i)));
            tokio::task::yield_now().await;
        }

        let mut last = 0;
        for _ in 0..10 {
            last = fast_rx.recv().await.unwrap().seq;
        }
        assert_eq!(last, 10);
        assert!(fanout.metrics.events_dropped() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_timer_fires_after_period() {
        let (room_tx, mut room_rx) = mpsc::channel(8);
        let mut fanout = broadcaster(&room_tx, 4);
        let user = UserId::new();

        fanout.schedule_grace(user);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert!(room_rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        let message = room_rx.recv().await.unwrap();
        let RoomMessage::GraceExpired { user_id, timer_id } = message else {
            unreachable!("expected GraceExpired, got {message:?}");
        };
        assert_eq!(user_id, user);
        assert!(fanout.take_expired(user, timer_id));
        assert!(!fanout.take_expired(user, timer_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_cancels_grace_timer() {
        let (room_tx, mut room_rx) = mpsc::channel(8);
        let mut fanout = broadcaster(&room_tx, 4);
        let user = UserId::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        fanout.schedule_grace(user);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        fanout.subscribe(user, Box::new(ChannelSink(tx)));
        assert_eq!(fanout.pending_grace_timers(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(room_rx.try_recv().is_err());
        assert!(fanout.has_connection(user));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduled_timer_supersedes_old_one() {
        let (room_tx, _room_rx) = mpsc::channel(8);
        let mut fanout = broadcaster(&room_tx, 4);
        let user = UserId::new();

        fanout.schedule_grace(user);
        fanout.schedule_grace(user);
        assert_eq!(fanout.pending_grace_timers(), 1);
        assert!(!fanout.take_expired(user, 1));
        assert!(fanout.take_expired(user, 2));
    }

    #[tokio::test]
    async fn test_disconnect_user_closes_only_their_connections() {
        let (room_tx, _room_rx) = mpsc::channel(8);
        let mut fanout = broadcaster(&room_tx, 4);
        let leaving = UserId::new();
        let staying = UserId::new();
        let (a, _a_rx) = mpsc::unbounded_channel();
        let (b, _b_rx) = mpsc::unbounded_channel();
        fanout.subscribe(leaving, Box::new(ChannelSink(a)));
        fanout.subscribe(staying, Box::new(ChannelSink(b)));

        fanout.disconnect_user(leaving);
        assert!(!fanout.has_connection(leaving));
        assert!(fanout.has_connection(staying));
        assert_eq!(fanout.subscriber_count(), 1);
    }
}
