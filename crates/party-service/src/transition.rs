//! The result of applying one mutation to a room aggregate.
//!
//! Transitions are computed on a copy of the aggregate. The room actor commits
//! them through the store and only then adopts `next` and publishes `events`.

use crate::models::{RoomAggregate, RoomEvent, SystemMessage};
use crate::store::RoomCommit;
use common::types::ParticipantId;

#[derive(Debug, Clone)]
pub struct Transition {
    /// Aggregate after the mutation.
    pub next: RoomAggregate,
    /// Rows to write as one atomic unit.
    pub commit: RoomCommit,
    /// Events published once the commit succeeds.
    pub events: Vec<RoomEvent>,
    /// Host promotion or termination. Retried once on a transient store error.
    pub critical: bool,
}

/// Accumulates the rows touched by a mutation.
#[derive(Debug)]
pub(crate) struct TransitionBuilder {
    next: RoomAggregate,
    touched: Vec<ParticipantId>,
    messages: Vec<SystemMessage>,
    events: Vec<RoomEvent>,
    critical: bool,
}

impl TransitionBuilder {
    pub(crate) fn new(next: RoomAggregate) -> Self {
        Self {
            next,
            touched: Vec::new(),
            messages: Vec::new(),
            events: Vec::new(),
            critical: false,
        }
    }

    pub(crate) fn aggregate(&self) -> &RoomAggregate {
        &self.next
    }

    pub(crate) fn aggregate_mut(&mut self) -> &mut RoomAggregate {
        &mut self.next
    }

    pub(crate) fn touch(&mut self, participant_id: ParticipantId) {
        if !self.touched.contains(&participant_id) {
            self.touched.push(participant_id);
        }
    }

    pub(crate) fn message(&mut self, message: SystemMessage) {
        self.messages.push(message);
    }

    pub(crate) fn event(&mut self, event: RoomEvent) {
        self.events.push(event);
    }

    pub(crate) fn critical(&mut self) {
        self.critical = true;
    }

    pub(crate) fn finish(self) -> Transition {
        // Rows are written in the order they were touched, so a demotion lands
        // before the matching promotion.
        let participants = self
            .touched
            .iter()
            .filter_map(|id| self.next.participants.iter().find(|p| p.id == *id))
            .cloned()
            .collect();

        Transition {
            commit: RoomCommit {
                room: self.next.room.clone(),
                participants,
                messages: self.messages,
            },
            next: self.next,
            events: self.events,
            critical: self.critical,
        }
    }
}
