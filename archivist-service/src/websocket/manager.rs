//! Notification hub.
//!
//! Tracks every open notification socket and its subscription, and fans
//! document events out to them. In-process consumers can also listen via
//! [`NotificationHub::subscribe_events`].

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::messages::{DocumentEvent, ServerMessage};

const EVENT_BACKLOG: usize = 256;

/// State for a single WebSocket connection
pub(crate) struct ConnectionState {
    pub(crate) tx: mpsc::UnboundedSender<ServerMessage>,
    pub(crate) subscribed: bool,
    /// Only events of this workspace are delivered when set
    pub(crate) workspace_filter: Option<String>,
}

impl ConnectionState {
    pub(crate) fn wants(&self, event: &DocumentEvent) -> bool {
        self.subscribed
            && self
                .workspace_filter
                .as_deref()
                .is_none_or(|w| w == event.workspace_id)
    }
}

/// Pub/sub channel for document pipeline events
pub struct NotificationHub {
    pub(crate) connections: DashMap<String, ConnectionState>,
    pub(crate) events: broadcast::Sender<DocumentEvent>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BACKLOG);
        Self {
            connections: DashMap::new(),
            events,
        }
    }

    /// Register a connection; new connections receive every event
    pub(crate) fn add_connection(
        &self,
        session_id: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        debug!(session_id = %session_id, "Adding notification connection");
        self.connections.insert(
            session_id,
            ConnectionState {
                tx,
                subscribed: true,
                workspace_filter: None,
            },
        );
    }

    pub(crate) fn remove_connection(&self, session_id: &str) {
        debug!(session_id = %session_id, "Removing notification connection");
        self.connections.remove(session_id);
    }

    pub(crate) fn set_subscription(
        &self,
        session_id: &str,
        subscribed: bool,
        workspace_filter: Option<String>,
    ) {
        if let Some(mut conn) = self.connections.get_mut(session_id) {
            conn.subscribed = subscribed;
            conn.workspace_filter = workspace_filter;
            debug!(
                session_id = %session_id,
                subscribed,
                workspace_id = ?conn.workspace_filter,
                "Updated subscription"
            );
        }
    }

    /// Send a message to a specific connection
    pub fn send_to(&self, session_id: &str, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(session_id)
            && conn.tx.send(msg).is_err()
        {
            tracing::warn!(session_id = %session_id, "Failed to send message to connection");
        }
    }

    /// Receive every event published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().subscribed)
            .count()
    }
}
