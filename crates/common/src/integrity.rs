//! Integrity monitoring
//!
//! Hash mismatches and signature failures indicate corruption or an active
//! attack, not a transient bug. They are escalated here, on a channel
//! distinct from ordinary error logging, and must never be downgraded to
//! a retry.

use std::sync::Arc;

use crate::node::NodeIdentifier;

/// Sink for integrity violations
pub trait IntegrityMonitor: Send + Sync {
    /// A downloaded block's ciphertext hash did not match its declared hash
    fn report_tampered_block(&self, id: &NodeIdentifier, block_index: u32);

    /// Content failed to decrypt in a way not attributable to the
    /// decryption primitive itself
    fn report_content_error(&self, id: &NodeIdentifier, detail: &str);

    /// A node's name signature failed verification against every
    /// candidate key
    fn report_signature_failure(&self, id: &NodeIdentifier, reason: &str);
}

/// Monitor that logs violations under the dedicated `integrity` target
#[derive(Debug, Clone, Default)]
pub struct TracingMonitor;

impl IntegrityMonitor for TracingMonitor {
    fn report_tampered_block(&self, id: &NodeIdentifier, block_index: u32) {
        tracing::error!(
            target: "integrity",
            "tampered block detected: node {} block {}",
            id,
            block_index
        );
    }

    fn report_content_error(&self, id: &NodeIdentifier, detail: &str) {
        tracing::error!(
            target: "integrity",
            "content integrity error: node {}: {}",
            id,
            detail
        );
    }

    fn report_signature_failure(&self, id: &NodeIdentifier, reason: &str) {
        tracing::error!(
            target: "integrity",
            "signature verification failed: node {}: {}",
            id,
            reason
        );
    }
}

impl<M: IntegrityMonitor + ?Sized> IntegrityMonitor for Arc<M> {
    fn report_tampered_block(&self, id: &NodeIdentifier, block_index: u32) {
        (**self).report_tampered_block(id, block_index)
    }

    fn report_content_error(&self, id: &NodeIdentifier, detail: &str) {
        (**self).report_content_error(id, detail)
    }

    fn report_signature_failure(&self, id: &NodeIdentifier, reason: &str) {
        (**self).report_signature_failure(id, reason)
    }
}
