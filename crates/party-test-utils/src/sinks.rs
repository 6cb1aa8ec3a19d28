//! Event sinks for subscriber tests.

use async_trait::async_trait;
use party_service::actors::EventSink;
use party_service::errors::PartyError;
use party_service::models::{RoomEvent, RoomEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `EventRecorder::next` waits before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink that forwards every event to an [`EventRecorder`].
pub struct RecordingSink {
    sender: mpsc::UnboundedSender<RoomEvent>,
}

impl RecordingSink {
    pub fn pair() -> (Box<dyn EventSink>, EventRecorder) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Box::new(Self { sender }), EventRecorder { receiver })
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&mut self, event: &RoomEvent) -> Result<(), PartyError> {
        self.sender
            .send(event.clone())
            .map_err(|_| PartyError::Internal("recorder dropped".to_string()))
    }
}

/// Receiving end of a [`RecordingSink`].
pub struct EventRecorder {
    receiver: mpsc::UnboundedReceiver<RoomEvent>,
}

impl EventRecorder {
    /// Next event, panicking after [`EVENT_TIMEOUT`] or if the sink closed.
    pub async fn next(&mut self) -> RoomEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.receiver.recv())
            .await
            .expect("timed out waiting for event")
            .expect("sink closed")
    }

    /// Skip events until one of `kind` arrives.
    pub async fn next_of(&mut self, kind: RoomEventKind) -> RoomEvent {
        loop {
            let event = self.next().await;
            if event.event == kind {
                return event;
            }
        }
    }

    /// Everything already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait until the sink is dropped, returning what arrived meanwhile.
    pub async fn until_closed(mut self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(EVENT_TIMEOUT, self.receiver.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return events,
                Err(_) => panic!("sink was not closed"),
            }
        }
    }
}

/// Sink whose sends never complete, standing in for a stuck client.
pub struct StalledSink;

#[async_trait]
impl EventSink for StalledSink {
    async fn send(&mut self, _event: &RoomEvent) -> Result<(), PartyError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
