//! Watch-party playback synchronization service.
//!
//! Users share a room bound to one video. The room's host alone drives the
//! playback position and pause state; every other participant receives
//! the host's updates as push events. When the host leaves, the earliest
//! remaining participant is promoted. The last participant out ends the
//! room.
//!
//! # Architecture
//!
//! ```text
//! routes -> handlers -> service::PartyService -> actors (registry -> room)
//!                                                  |-> lifecycle / membership / playback
//!                                                  |-> store
//!                                                  `-> broadcast -> connection
//! ```
//!
//! `lifecycle`, `membership` and `playback` are pure transitions over a
//! [`models::RoomAggregate`]. The room actor commits each transition
//! through the [`store::RoomStore`] before adopting it, so memory never
//! runs ahead of the store.
//!
//! # Modules
//!
//! - `actors` - registry, per-room actors, fan-out, connection writers
//! - `catalog` - video catalog collaborator
//! - `config` - configuration from environment
//! - `errors` - `PartyError` with HTTP mapping
//! - `handlers` / `routes` / `middleware` - HTTP and WebSocket transport
//! - `identity` - caller resolution
//! - `observability` - Prometheus metrics
//! - `service` - transport-agnostic operations
//! - `store` - in-memory and Postgres persistence

pub mod actors;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod lifecycle;
pub mod membership;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod playback;
pub mod routes;
pub mod service;
pub mod store;
pub mod transition;
