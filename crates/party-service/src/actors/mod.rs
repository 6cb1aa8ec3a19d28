//! Actor hierarchy for live rooms.
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── RoomActor (one per live room, single writer for that room)
//!     ├── EventBroadcaster (fan-out, grace timers)
//!     └── ConnectionActor (one per push subscriber)
//! ```
//!
//! Requests use `mpsc` plus a `oneshot` reply. Cancellation flows down
//! through child `CancellationToken`s.

pub mod broadcast;
pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{EventSink, OutboundQueue, SEND_TIMEOUT};
pub use messages::{ConnectionId, RegistryStatus, RoomActorState, Subscribed};
pub use metrics::ActorMetrics;
pub use registry::RoomRegistryHandle;
pub use room::{RoomActorHandle, RoomActorSettings};
