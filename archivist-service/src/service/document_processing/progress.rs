//! Status event helpers.

use crate::db::Document;
use crate::service::ArchivistService;
use crate::websocket::DocumentEvent;

impl ArchivistService {
    pub(crate) fn publish_progress(&self, doc: &Document, message: &str) {
        self.hub.publish(DocumentEvent::processing(doc, message));
    }

    pub(crate) fn publish_completed(&self, doc: &Document, chunk_count: usize) {
        self.hub.publish(DocumentEvent::completed(doc, chunk_count));
    }

    pub(crate) fn publish_failure(&self, doc: &Document, error: &str) {
        self.hub.publish(DocumentEvent::failed(doc, error));
    }
}
