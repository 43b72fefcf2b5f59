//! WebSocket notifications for document processing.
//!
//! Clients connected to `/ws/notifications` receive a JSON message for every
//! pipeline transition (`PROCESSING`, `COMPLETED`, `ERROR`) without polling.

mod broadcast;
mod handlers;
mod manager;
pub mod messages;

pub use handlers::handle_ws_connection;
pub use manager::NotificationHub;
pub use messages::{ClientMessage, DocumentEvent, EventStatus, ServerMessage};
