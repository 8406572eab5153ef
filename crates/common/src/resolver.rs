//! Key-chain resolution
//!
//! Producing cleartext material for one node means decrypting its whole
//! ancestor chain: the share root's passphrase is wrapped to the owning
//! address key, and every node below stores its passphrase encrypted under
//! its parent's secret.
//!
//! The resolver walks the chain iteratively (node → parent → ... → share
//! root), then folds decryption back down, memoizing intermediate key
//! material so event batches and deep trees do not re-derive the same
//! ancestors over and over. Nothing here retries: every failure is either
//! a permanent input-shape problem or a pure cryptographic failure.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::crypto::{HashKey, NodeKeys, PublicKey, SecretError, SecretKey};
use crate::integrity::IntegrityMonitor;
use crate::node::{AddressId, Node, NodeIdentifier, Share, ShareId};
use crate::store::NodeStore;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// A required field is absent or malformed on the node record
    #[error("invalid file metadata: {0}")]
    InvalidFileMetadata(&'static str),
    /// The node's chain yields no address to resolve a signer from
    #[error("node has no signature address")]
    NoSignatureAddress,
    /// The signature address is known but its keys are not available
    #[error("missing keys for address {0}")]
    MissingAddressKeys(AddressId),
    /// A decryption step in the chain failed
    #[error("decryption failed: {0}")]
    DecryptionFailed(#[from] SecretError),
    /// The hierarchy is structurally broken (e.g. an orphaned non-root
    /// node). Never transient, never retried.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The storage collaborator failed
    #[error("store error: {0}")]
    Store(String),
}

/// Key material resolved for one address
#[derive(Debug, Clone)]
pub struct AddressKeys {
    pub address_id: AddressId,
    pub email: String,
    /// Public keys acceptable for verifying this address's signatures
    pub verification_keys: Vec<PublicKey>,
    /// Private key, present only for the account's own addresses
    pub secret: Option<SecretKey>,
}

/// Resolves address identifiers to key material
///
/// The implementation typically fronts the account's session vault.
pub trait SignerResolver: Send + Sync {
    fn resolve(&self, address_id: &AddressId) -> Result<AddressKeys, ResolverError>;

    /// Resolve `primary`, falling back to `fallback` if that fails.
    ///
    /// The fallback exists for legacy records whose context share address
    /// is no longer resolvable. It is never silent: the primary failure is
    /// logged before the fallback is consulted.
    fn resolve_or_fallback(
        &self,
        primary: &AddressId,
        fallback: &AddressId,
    ) -> Result<AddressKeys, ResolverError> {
        match self.resolve(primary) {
            Ok(keys) => Ok(keys),
            Err(err) => {
                tracing::warn!(
                    "signer resolution for address {} failed, using fallback {}: {}",
                    primary,
                    fallback,
                    err
                );
                self.resolve(fallback)
            }
        }
    }
}

/// Outcome of verifying a node's name signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Signed by a key we trust for this node
    Verified,
    /// The value is still usable, but could not be verified; carries the
    /// reason it was not
    Unverified(String),
}

/// Fully decrypted, signature-checked material for one node
#[derive(Debug, Clone)]
pub struct NodeCryptoMaterial {
    pub id: NodeIdentifier,
    /// Decrypted current name
    pub name: String,
    /// The node's own derived key material
    pub keys: NodeKeys,
    /// Decrypted hash key; present exactly for folder-like nodes
    pub hash_key: Option<HashKey>,
    /// Email of the resolved signer address
    pub signer_email: String,
    pub signature: SignatureStatus,
    /// Content digest of the current revision, for file nodes that
    /// declare one
    pub content_digest: Option<String>,
}

/// Walks and decrypts node ownership chains
///
/// One resolver instance memoizes intermediate key material across calls;
/// scope instances to whatever unit of work should share a cache (an event
/// batch, an enumeration pass).
pub struct KeyChainResolver<S, R, M> {
    store: S,
    signers: R,
    monitor: M,
    node_cache: Mutex<HashMap<NodeIdentifier, NodeKeys>>,
    share_cache: Mutex<HashMap<ShareId, NodeKeys>>,
}

impl<S, R, M> KeyChainResolver<S, R, M>
where
    S: NodeStore,
    R: SignerResolver,
    M: IntegrityMonitor,
{
    pub fn new(store: S, signers: R, monitor: M) -> Self {
        Self {
            store,
            signers,
            monitor,
            node_cache: Mutex::new(HashMap::new()),
            share_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the verified crypto material bundle for a node
    pub async fn resolve(
        &self,
        id: &NodeIdentifier,
    ) -> Result<NodeCryptoMaterial, ResolverError> {
        self.resolve_inner(id, None).await
    }

    /// Like [`Self::resolve`], but falls back to `fallback` when the
    /// context share address cannot be resolved. The fallback path is
    /// explicit and logged; see [`SignerResolver::resolve_or_fallback`].
    pub async fn resolve_with_fallback_signer(
        &self,
        id: &NodeIdentifier,
        fallback: &AddressId,
    ) -> Result<NodeCryptoMaterial, ResolverError> {
        self.resolve_inner(id, Some(fallback)).await
    }

    async fn resolve_inner(
        &self,
        id: &NodeIdentifier,
        fallback: Option<&AddressId>,
    ) -> Result<NodeCryptoMaterial, ResolverError> {
        let node = self.fetch_node(id).await?;

        let share = self.context_share(&node).await?;
        let signer = match fallback {
            Some(fb) => self.signers.resolve_or_fallback(&share.address_id, fb)?,
            None => self.signers.resolve(&share.address_id)?,
        };

        // The parent chain must resolve before the node's own material is
        // touched; a failure here never yields partial output.
        let keys = self.node_keys_with(&node, Some(&signer)).await?;
        let parent_secret = match node.parent {
            Some(parent) => {
                let parent_id = NodeIdentifier::new(node.id.volume, parent);
                let cached = self.node_cache.lock().get(&parent_id).cloned();
                match cached {
                    Some(parent_keys) => parent_keys.secret().clone(),
                    // node_keys() warms the cache for every ancestor, so
                    // this only happens if the hierarchy changed under us
                    None => {
                        return Err(ResolverError::InvalidState(format!(
                            "parent of {} disappeared during resolution",
                            node.id
                        )))
                    }
                }
            }
            None => self.share_keys(&share, Some(&signer))?.secret().clone(),
        };

        let name_bytes = parent_secret.decrypt(&node.encrypted_name)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|_| ResolverError::InvalidFileMetadata("name is not valid UTF-8"))?;

        let signature = self.verify_name(&node, &name, &signer, &keys);

        let hash_key = if node.is_folder() {
            let encrypted = node
                .encrypted_hash_key
                .as_deref()
                .ok_or(ResolverError::InvalidFileMetadata("folder is missing hash key"))?;
            let raw = keys.secret().decrypt(encrypted)?;
            Some(HashKey::from_slice(&raw)?)
        } else {
            None
        };

        Ok(NodeCryptoMaterial {
            id: node.id,
            name,
            keys,
            hash_key,
            signer_email: signer.email,
            signature,
            content_digest: node.content_digest.clone(),
        })
    }

    /// Derive the node's own key material, decrypting the ancestor chain
    /// as needed
    ///
    /// Explicitly iterative: ancestors are collected walking up, then
    /// decryption folds back down, so stack depth stays bounded on deep
    /// trees and every intermediate result lands in the cache.
    pub async fn node_keys(&self, node: &Node) -> Result<NodeKeys, ResolverError> {
        self.node_keys_with(node, None).await
    }

    async fn node_keys_with(
        &self,
        node: &Node,
        address: Option<&AddressKeys>,
    ) -> Result<NodeKeys, ResolverError> {
        let mut pending: Vec<Node> = Vec::new();
        let mut current = node.clone();

        let mut inherited = loop {
            if let Some(keys) = self.node_cache.lock().get(&current.id).cloned() {
                break keys;
            }
            match current.parent {
                Some(parent) => {
                    let parent_id = NodeIdentifier::new(current.id.volume, parent);
                    let parent_node = self
                        .store
                        .node(&parent_id)
                        .await
                        .map_err(|e| ResolverError::Store(e.to_string()))?
                        .ok_or_else(|| {
                            ResolverError::InvalidState(format!(
                                "node {} is orphaned: parent {} does not exist",
                                current.id, parent_id
                            ))
                        })?;
                    pending.push(current);
                    current = parent_node;
                }
                None => {
                    // Share root: the chain bottoms out at the share's
                    // wrapped passphrase.
                    let share_id = current
                        .share
                        .ok_or_else(|| {
                            ResolverError::InvalidState(format!(
                                "root node {} is not attached to a share",
                                current.id
                            ))
                        })?;
                    let share = self.fetch_share(&share_id).await?;
                    pending.push(current);
                    break self.share_keys(&share, address)?;
                }
            }
        };

        for ancestor in pending.iter().rev() {
            let passphrase = inherited.secret().decrypt(&ancestor.encrypted_passphrase)?;
            let keys = NodeKeys::derive(&passphrase)?;
            self.node_cache.lock().insert(ancestor.id, keys.clone());
            inherited = keys;
        }

        Ok(inherited)
    }

    /// Key material of the share itself, recovered from the passphrase
    /// wrapped to the owning address
    ///
    /// `address` carries pre-resolved keys (possibly a fallback signer's);
    /// without them the share's own address is resolved.
    fn share_keys(
        &self,
        share: &Share,
        address: Option<&AddressKeys>,
    ) -> Result<NodeKeys, ResolverError> {
        if let Some(keys) = self.share_cache.lock().get(&share.id).cloned() {
            return Ok(keys);
        }

        let resolved;
        let address = match address {
            Some(address) => address,
            None => {
                resolved = self.signers.resolve(&share.address_id)?;
                &resolved
            }
        };
        let secret = address
            .secret
            .as_ref()
            .ok_or_else(|| ResolverError::MissingAddressKeys(address.address_id.clone()))?;
        let passphrase = share
            .passphrase
            .recover(secret)
            .map_err(|e| ResolverError::DecryptionFailed(anyhow::anyhow!(e).into()))?;
        let keys = NodeKeys::derive(passphrase.bytes())?;

        self.share_cache.lock().insert(share.id, keys.clone());
        Ok(keys)
    }

    fn verify_name(
        &self,
        node: &Node,
        name: &str,
        signer: &AddressKeys,
        keys: &NodeKeys,
    ) -> SignatureStatus {
        let signature = match &node.name_signature {
            Some(signature) => signature,
            None => {
                // Anonymous uploaders are known to be non-verifiable; only
                // a missing signature on an attributed node is escalated.
                let reason = "node has no name signature".to_string();
                if !node.is_anonymous() {
                    self.monitor.report_signature_failure(&node.id, &reason);
                }
                return SignatureStatus::Unverified(reason);
            }
        };

        // Names may be self-signed with the node's own derived key
        // (anonymous uploads), so that key joins the candidate set.
        let candidates = signer
            .verification_keys
            .iter()
            .copied()
            .chain(std::iter::once(keys.verification_key()));
        for key in candidates {
            if key.verify(name.as_bytes(), signature).is_ok() {
                return SignatureStatus::Verified;
            }
        }

        let reason = format!(
            "signature did not match any key of {} or the node key",
            signer.address_id
        );
        if !node.is_anonymous() {
            self.monitor.report_signature_failure(&node.id, &reason);
        }
        SignatureStatus::Unverified(reason)
    }

    /// The share at the top of this node's ownership chain
    async fn context_share(&self, node: &Node) -> Result<Share, ResolverError> {
        let mut current = node.clone();
        loop {
            match (current.share, current.parent) {
                (Some(share_id), _) => return self.fetch_share(&share_id).await,
                (None, Some(parent)) => {
                    let parent_id = NodeIdentifier::new(current.id.volume, parent);
                    current = self
                        .store
                        .node(&parent_id)
                        .await
                        .map_err(|e| ResolverError::Store(e.to_string()))?
                        .ok_or_else(|| {
                            ResolverError::InvalidState(format!(
                                "node {} is orphaned: parent {} does not exist",
                                current.id, parent_id
                            ))
                        })?;
                }
                (None, None) => return Err(ResolverError::NoSignatureAddress),
            }
        }
    }

    async fn fetch_node(&self, id: &NodeIdentifier) -> Result<Node, ResolverError> {
        self.store
            .node_or_err(id)
            .await
            .map_err(|e| ResolverError::Store(e.to_string()))
    }

    async fn fetch_share(&self, id: &ShareId) -> Result<Share, ResolverError> {
        self.store
            .share_or_err(id)
            .await
            .map_err(|e| ResolverError::Store(e.to_string()))
    }
}
