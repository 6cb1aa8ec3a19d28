//! # Party Test Utilities
//!
//! Shared test utilities for the watch-party service.
//!
//! This crate provides:
//! - Fixtures (`fixtures`): test users, videos and create requests
//! - Store doubles (`faulty_store`): `FaultyStore` for commit failure injection
//! - Event sinks (`sinks`): `RecordingSink` and `StalledSink`
//! - Harness (`server_harness`): `TestParty` (service + router) and
//!   `TestPartyServer` (real listener)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use party_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let party = TestParty::new();
//!     let hana = party.user("Hana");
//!     let view = party
//!         .service
//!         .create_room(hana, &create_request("Movie night", 4))
//!         .await
//!         .unwrap();
//!     assert_eq!(view.host_id, hana.user_id);
//! }
//! ```

pub mod faulty_store;
pub mod fixtures;
pub mod server_harness;
pub mod sinks;

pub use faulty_store::*;
pub use fixtures::*;
pub use server_harness::*;
pub use sinks::*;
