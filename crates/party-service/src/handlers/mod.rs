//! HTTP and WebSocket handlers for the party service.

pub mod health;
pub mod rooms;
pub mod ws;

pub use health::{health_check, metrics_handler, readiness_check};
pub use rooms::{
    create_room, delete_room, get_room, join_room, leave_room, list_messages, list_rooms,
    update_sync,
};
pub use ws::room_socket;
