use std::sync::Arc;

use parking_lot::Mutex;

use crate::integrity::IntegrityMonitor;
use crate::node::NodeIdentifier;

/// Integrity monitor that records every report for later assertions
#[derive(Debug, Clone, Default)]
pub struct RecordingMonitor {
    inner: Arc<Mutex<Reports>>,
}

#[derive(Debug, Default)]
struct Reports {
    tampered: Vec<(NodeIdentifier, u32)>,
    content: Vec<(NodeIdentifier, String)>,
    signature: Vec<(NodeIdentifier, String)>,
}

impl RecordingMonitor {
    pub fn tampered_blocks(&self) -> Vec<(NodeIdentifier, u32)> {
        self.inner.lock().tampered.clone()
    }

    pub fn content_errors(&self) -> Vec<(NodeIdentifier, String)> {
        self.inner.lock().content.clone()
    }

    pub fn signature_failures(&self) -> Vec<(NodeIdentifier, String)> {
        self.inner.lock().signature.clone()
    }
}

impl IntegrityMonitor for RecordingMonitor {
    fn report_tampered_block(&self, id: &NodeIdentifier, block_index: u32) {
        self.inner.lock().tampered.push((*id, block_index));
    }

    fn report_content_error(&self, id: &NodeIdentifier, detail: &str) {
        self.inner.lock().content.push((*id, detail.to_string()));
    }

    fn report_signature_failure(&self, id: &NodeIdentifier, reason: &str) {
        self.inner.lock().signature.push((*id, reason.to_string()));
    }
}
