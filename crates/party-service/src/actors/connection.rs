//! `ConnectionActor`: one per push subscriber.
//!
//! The room actor never awaits a subscriber. It pushes events into the
//! connection's [`OutboundQueue`], which is bounded and drops its oldest
//! entry when full, and the connection actor drains the queue into its
//! [`EventSink`] at whatever pace the transport allows.
//!
//! A sink error or a send that exceeds [`SEND_TIMEOUT`] ends the actor and
//! reports `ConnectionClosed` to the room, which then starts the user's
//! disconnect grace period.

use super::messages::{ConnectionId, RoomMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::PartyError;
use crate::models::RoomEvent;
use async_trait::async_trait;
use common::types::{RoomId, UserId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on a single delivery to the sink.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed to flush queued events when the room closes the connection.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport a subscriber receives events through.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &RoomEvent) -> Result<(), PartyError>;

    /// Called once when the connection actor exits.
    async fn close(&mut self) {}
}

/// What happened to an event handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queued, but the oldest pending event was discarded to make room.
    DroppedOldest,
    /// The connection is shutting down; the event was discarded.
    Closed,
}

/// Bounded single-consumer event queue that sheds its oldest entry.
#[derive(Debug)]
pub struct OutboundQueue {
    events: Mutex<VecDeque<RoomEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue without waiting.
    pub fn push(&self, event: RoomEvent) -> Delivery {
        if self.closed.load(Ordering::Acquire) {
            return Delivery::Closed;
        }

        let dropped = {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = if events.len() >= self.capacity {
                events.pop_front();
                true
            } else {
                false
            };
            events.push_back(event);
            dropped
        };
        self.notify.notify_one();

        if dropped {
            Delivery::DroppedOldest
        } else {
            Delivery::Queued
        }
    }

    /// Wait for the next event. `None` once the queue is closed.
    pub async fn pop(&self) -> Option<RoomEvent> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            self.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<RoomEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Room-side view of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionActorHandle {
    connection_id: ConnectionId,
    user_id: UserId,
    queue: Arc<OutboundQueue>,
    cancel_token: CancellationToken,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Hand `event` to the connection. Never waits.
    pub fn deliver(&self, event: RoomEvent) -> Delivery {
        if self.cancel_token.is_cancelled() {
            return Delivery::Closed;
        }
        self.queue.push(event)
    }

    /// Ask the actor to flush what it has queued and exit.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Room-level settings every connection of a room shares.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub room_id: RoomId,
    pub room: mpsc::WeakSender<RoomMessage>,
    pub queue_capacity: usize,
    pub metrics: Arc<ActorMetrics>,
}

pub struct ConnectionActor {
    connection_id: ConnectionId,
    user_id: UserId,
    room_id: RoomId,
    queue: Arc<OutboundQueue>,
    sink: Box<dyn EventSink>,
    /// Child of the room's token.
    cancel_token: CancellationToken,
    room: mpsc::WeakSender<RoomMessage>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    pub fn spawn(
        user_id: UserId,
        sink: Box<dyn EventSink>,
        context: &ConnectionContext,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let connection_id = ConnectionId::new();
        let queue = Arc::new(OutboundQueue::new(context.queue_capacity));

        let actor = Self {
            connection_id,
            user_id,
            room_id: context.room_id,
            queue: Arc::clone(&queue),
            sink,
            cancel_token: cancel_token.clone(),
            room: context.room.clone(),
            metrics: Arc::clone(&context.metrics),
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };
        context.metrics.connection_opened();

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            connection_id,
            user_id,
            queue,
            cancel_token,
        };
        (handle, task_handle)
    }

    async fn run(mut self) {
        debug!(
            target: "party.actor.connection",
            connection_id = %self.connection_id,
            room_id = %self.room_id,
            user_id = %self.user_id,
            "ConnectionActor started"
        );

        let closed_by_room = loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break true,

                next = self.queue.pop() => {
                    let Some(event) = next else {
                        break true;
                    };
                    self.mailbox.observe(self.queue.len());
                    if let Err(e) = self.send(&event).await {
                        warn!(
                            target: "party.actor.connection",
                            connection_id = %self.connection_id,
                            room_id = %self.room_id,
                            error = %e,
                            "Event delivery failed, dropping subscriber"
                        );
                        break false;
                    }
                }
            }
        };

        if closed_by_room {
            self.flush().await;
        }
        self.queue.close();
        self.sink.close().await;
        self.metrics.connection_closed();

        if !closed_by_room {
            if let Some(room) = self.room.upgrade() {
                let _ = room
                    .send(RoomMessage::ConnectionClosed {
                        connection_id: self.connection_id,
                    })
                    .await;
            }
        }

        debug!(
            target: "party.actor.connection",
            connection_id = %self.connection_id,
            room_id = %self.room_id,
            events_sent = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    async fn send(&mut self, event: &RoomEvent) -> Result<(), PartyError> {
        match tokio::time::timeout(SEND_TIMEOUT, self.sink.send(event)).await {
            Ok(result) => result,
            Err(_) => Err(PartyError::Internal(
                "event delivery timed out".to_string(),
            )),
        }
    }

    /// Best-effort delivery of whatever is still queued.
    async fn flush(&mut self) {
        let queue = &self.queue;
        let sink = &mut self.sink;
        let drained = tokio::time::timeout(FLUSH_TIMEOUT, async {
            while let Some(event) = queue.try_pop() {
                if sink.send(&event).await.is_err() {
                    break;
                }
            }
        })
        .await;

        if drained.is_err() {
            debug!(
                target: "party.actor.connection",
                connection_id = %self.connection_id,
                remaining = self.queue.len(),
                "Flush timed out"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Forwards every event into an unbounded channel.
    pub(crate) struct ChannelSink(pub(crate) mpsc::UnboundedSender<RoomEvent>);

    impl ChannelSink {
        pub(crate) fn pair() -> (Box<dyn EventSink>, mpsc::UnboundedReceiver<RoomEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Box::new(Self(tx)), rx)
        }
    }

    #[async_trait]
    impl EventSink for ChannelSink {
        async fn send(&mut self, event: &RoomEvent) -> Result<(), PartyError> {
            self.0
                .send(event.clone())
                .map_err(|_| PartyError::Internal("subscriber gone".to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::SyncDelta;

    use super::testing::ChannelSink;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn send(&mut self, _event: &RoomEvent) -> Result<(), PartyError> {
            Err(PartyError::Internal("socket reset".to_string()))
        }
    }

    fn event(room_id: RoomId, seq: u64) -> RoomEvent {
        let mut event = RoomEvent::sync(
            room_id,
            SyncDelta {
                current_time: 1.0,
                is_paused: false,
                sync_seq: seq,
            },
        );
        event.seq = seq;
        event
    }

    fn context(room: &mpsc::Sender<RoomMessage>, capacity: usize) -> ConnectionContext {
        ConnectionContext {
            room_id: RoomId::new(),
            room: room.downgrade(),
            queue_capacity: capacity,
            metrics: ActorMetrics::new(),
        }
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let room_id = RoomId::new();
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push(event(room_id, 1)), Delivery::Queued);
        assert_eq!(queue.push(event(room_id, 2)), Delivery::Queued);
        assert_eq!(queue.push(event(room_id, 3)), Delivery::DroppedOldest);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop().unwrap().seq, 2);
        assert_eq!(queue.try_pop().unwrap().seq, 3);
        assert!(queue.is_empty());

        queue.close();
        assert_eq!(queue.push(event(room_id, 4)), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push_and_close() {
        let queue = Arc::new(OutboundQueue::new(4));
        let consumer = Arc::clone(&queue);
        let task = tokio::spawn(async move { consumer.pop().await });

        tokio::task::yield_now().await;
        queue.push(event(RoomId::new(), 7));
        assert_eq!(task.await.unwrap().unwrap().seq, 7);

        let consumer = Arc::clone(&queue);
        let task = tokio::spawn(async move { consumer.pop().await });
        tokio::task::yield_now().await;
        queue.close();
        assert!(task.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let (room_tx, _room_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let ctx = context(&room_tx, 16);

        let (handle, task) = ConnectionActor::spawn(
            UserId::new(),
            Box::new(ChannelSink(sink_tx)),
            &ctx,
            CancellationToken::new(),
        );

        for seq in 1..=3 {
            assert_eq!(handle.deliver(event(ctx.room_id, seq)), Delivery::Queued);
        }
        for seq in 1..=3 {
            assert_eq!(sink_rx.recv().await.unwrap().seq, seq);
        }

        handle.close();
        task.await.unwrap();
        assert_eq!(ctx.metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_flushes_queued_events() {
        let (room_tx, _room_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let ctx = context(&room_tx, 16);
        let token = CancellationToken::new();

        let (handle, task) = ConnectionActor::spawn(
            UserId::new(),
            Box::new(ChannelSink(sink_tx)),
            &ctx,
            token.clone(),
        );

        handle.deliver(event(ctx.room_id, 1));
        token.cancel();
        task.await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = sink_rx.try_recv() {
            received.push(event.seq);
        }
        assert_eq!(received, vec![1]);
        assert_eq!(handle.deliver(event(ctx.room_id, 2)), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_failed_sink_reports_to_room() {
        let (room_tx, mut room_rx) = mpsc::channel(8);
        let ctx = context(&room_tx, 16);

        let (handle, task) = ConnectionActor::spawn(
            UserId::new(),
            Box::new(FailingSink),
            &ctx,
            CancellationToken::new(),
        );
        handle.deliver(event(ctx.room_id, 1));
        task.await.unwrap();

        let message = room_rx.recv().await.unwrap();
        assert!(matches!(
            message,
            RoomMessage::ConnectionClosed { connection_id }
                if connection_id == handle.connection_id()
        ));
    }
}
