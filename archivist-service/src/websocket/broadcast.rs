//! Publishing document events to subscribers.

use tracing::debug;

use super::manager::NotificationHub;
use super::messages::{DocumentEvent, ServerMessage};

impl NotificationHub {
    /// Publish an event to the in-process channel and every matching socket.
    ///
    /// Publishing never fails; events with no listeners are dropped.
    pub fn publish(&self, event: DocumentEvent) {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.wants(&event)
                && conn
                    .tx
                    .send(ServerMessage::Document(event.clone()))
                    .is_ok()
            {
                sent_count += 1;
            }
        }

        debug!(
            doc_id = %event.document_id,
            status = ?event.status,
            sent_count,
            "Published document event"
        );

        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Document;
    use crate::websocket::messages::EventStatus;
    use tokio::sync::mpsc;

    fn document(workspace: &str) -> Document {
        Document::new_pending(workspace, None, None, "a.txt", "text")
    }

    #[tokio::test]
    async fn test_publish_respects_workspace_filter() {
        let hub = NotificationHub::new();
        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        let (filtered_tx, mut filtered_rx) = mpsc::unbounded_channel();
        let (off_tx, mut off_rx) = mpsc::unbounded_channel();

        hub.add_connection("all".to_string(), all_tx);
        hub.add_connection("filtered".to_string(), filtered_tx);
        hub.add_connection("off".to_string(), off_tx);
        hub.set_subscription("filtered", true, Some("ws-b".to_string()));
        hub.set_subscription("off", false, None);

        let mut events = hub.subscribe_events();
        let doc = document("ws-a");
        hub.publish(DocumentEvent::processing(&doc, "Starting processing"));

        match all_rx.try_recv().unwrap() {
            ServerMessage::Document(event) => {
                assert_eq!(event.status, EventStatus::Processing);
                assert_eq!(event.document_id, doc.id);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(filtered_rx.try_recv().is_err());
        assert!(off_rx.try_recv().is_err());

        let received = events.recv().await.unwrap();
        assert_eq!(received.workspace_id, "ws-a");
    }

    #[test]
    fn test_publish_without_listeners_is_fine() {
        let hub = NotificationHub::new();
        hub.publish(DocumentEvent::completed(&document("ws-a"), 3));
    }
}
