//! Block-level content verification
//!
//! Downloaded ciphertext is never trusted as-is: its hash must match the
//! hash declared in the block metadata before any decryption is attempted.
//! A mismatch is a tamper condition, reported to the integrity monitor,
//! and is never confused with "not downloaded yet".

use sha2::{Digest, Sha256};

use crate::crypto::{Secret, SecretError};
use crate::integrity::IntegrityMonitor;
use crate::node::{Block, NodeIdentifier};

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// The node metadata exists but the block's bytes are not on disk yet
    #[error("block data is not downloaded")]
    NotDownloaded,
    /// Locally computed ciphertext hash does not match the declared hash
    #[error("block has an invalid hash")]
    Tampered,
    /// Decryption failed after the hash check passed
    #[error("block decryption failed: {0}")]
    Decryption(#[from] SecretError),
}

/// Verifies and decrypts downloaded content blocks
pub struct ContentVerifier<M> {
    monitor: M,
}

impl<M: IntegrityMonitor> ContentVerifier<M> {
    pub fn new(monitor: M) -> Self {
        Self { monitor }
    }

    /// Verify a downloaded block and produce its cleartext
    ///
    /// * `ciphertext` is `None` when the bytes have not been fetched yet;
    ///   that is a distinct condition from any decryption failure.
    /// * An empty ciphertext for a zero-size revision is valid and skips
    ///   decryption entirely.
    /// * The ciphertext hash is checked against `block.sha256` before the
    ///   session key ever touches the data.
    pub fn decrypt_block(
        &self,
        id: &NodeIdentifier,
        block: &Block,
        revision_size: u64,
        ciphertext: Option<&[u8]>,
        session_key: &Secret,
    ) -> Result<Vec<u8>, BlockError> {
        let ciphertext = ciphertext.ok_or(BlockError::NotDownloaded)?;

        // empty file does not require decryption
        if ciphertext.is_empty() || revision_size == 0 {
            return Ok(Vec::new());
        }

        let computed: [u8; 32] = Sha256::digest(ciphertext).into();
        if computed != block.sha256 {
            self.monitor.report_tampered_block(id, block.index);
            return Err(BlockError::Tampered);
        }

        match session_key.decrypt(ciphertext) {
            Ok(cleartext) => Ok(cleartext),
            Err(err) => {
                // The hash matched but decryption still failed. If the
                // failure did not come from the AEAD primitive, the
                // ciphertext envelope itself is suspect.
                if !err.is_primitive_failure() {
                    self.monitor.report_content_error(id, &err.to_string());
                }
                tracing::error!(
                    "block decryption failed: node {} block {}: {}",
                    id,
                    block.index,
                    err
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::{NodeId, VolumeId};
    use crate::testkit::RecordingMonitor;

    fn block_for(ciphertext: &[u8]) -> Block {
        Block {
            index: 0,
            sha256: Sha256::digest(ciphertext).into(),
            download_url: "https://blocks.example/0".into(),
            enc_signature: None,
            signature_email: None,
        }
    }

    fn node_id() -> NodeIdentifier {
        NodeIdentifier::new(VolumeId::generate(), NodeId::generate())
    }

    #[test]
    fn test_roundtrip() {
        let session_key = Secret::generate();
        let ciphertext = session_key.encrypt(b"file contents").unwrap();
        let block = block_for(&ciphertext);
        let verifier = ContentVerifier::new(RecordingMonitor::default());

        let cleartext = verifier
            .decrypt_block(&node_id(), &block, 13, Some(&ciphertext), &session_key)
            .unwrap();
        assert_eq!(cleartext, b"file contents");
    }

    #[test]
    fn test_not_downloaded() {
        let session_key = Secret::generate();
        let block = block_for(b"whatever");
        let verifier = ContentVerifier::new(RecordingMonitor::default());

        let err = verifier
            .decrypt_block(&node_id(), &block, 8, None, &session_key)
            .unwrap_err();
        assert!(matches!(err, BlockError::NotDownloaded));
    }

    #[test]
    fn test_zero_size_revision_skips_decryption() {
        // Session key that could not possibly decrypt anything; it must
        // never be used for an empty revision.
        let session_key = Secret::generate();
        let block = block_for(b"");
        let verifier = ContentVerifier::new(RecordingMonitor::default());

        let cleartext = verifier
            .decrypt_block(&node_id(), &block, 0, Some(b""), &session_key)
            .unwrap();
        assert!(cleartext.is_empty());
    }

    #[test]
    fn test_tampered_block_reported_before_decryption() {
        let session_key = Secret::generate();
        let ciphertext = session_key.encrypt(b"file contents").unwrap();
        let mut block = block_for(&ciphertext);
        block.sha256[0] ^= 0xFF;

        let monitor = RecordingMonitor::default();
        let verifier = ContentVerifier::new(monitor.clone());
        let id = node_id();

        let err = verifier
            .decrypt_block(&id, &block, 13, Some(&ciphertext), &session_key)
            .unwrap_err();
        assert!(matches!(err, BlockError::Tampered));
        assert_eq!(monitor.tampered_blocks(), vec![(id, 0)]);
    }

    #[test]
    fn test_wrong_key_is_plain_decryption_error() {
        let session_key = Secret::generate();
        let wrong_key = Secret::generate();
        let ciphertext = session_key.encrypt(b"file contents").unwrap();
        let block = block_for(&ciphertext);

        let monitor = RecordingMonitor::default();
        let verifier = ContentVerifier::new(monitor.clone());

        let err = verifier
            .decrypt_block(&node_id(), &block, 13, Some(&ciphertext), &wrong_key)
            .unwrap_err();
        assert!(matches!(err, BlockError::Decryption(SecretError::Aead)));
        // AEAD failure is the primitive's own failure, not escalated
        assert!(monitor.content_errors().is_empty());
    }

    #[test]
    fn test_malformed_envelope_is_escalated() {
        // Bytes that hash correctly but are too short to be a valid
        // envelope: the declared hash was computed over garbage.
        let garbage = b"short".to_vec();
        let block = block_for(&garbage);
        let session_key = Secret::generate();

        let monitor = RecordingMonitor::default();
        let verifier = ContentVerifier::new(monitor.clone());
        let id = node_id();

        let err = verifier
            .decrypt_block(&id, &block, 5, Some(&garbage), &session_key)
            .unwrap_err();
        assert!(matches!(err, BlockError::Decryption(SecretError::Malformed(_))));
        assert_eq!(monitor.content_errors().len(), 1);
    }
}
