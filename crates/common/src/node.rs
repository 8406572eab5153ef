use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{Signature, SecretShare};

/**
 * Nodes
 * =====
 * Nodes are the building blocks of the encrypted metadata hierarchy.
 * A node is either a folder or a file, addressed by `(volume, node)`.
 * All sensitive attributes (name, passphrase, hash key) are stored
 *  encrypted; nothing here is cleartext except structure and state.
 * Decrypting a node requires its parent's key material, so the model
 *  forms a strict decryption dependency chain from each share root
 *  down to the leaves.
 */

/// Identifier of a volume (a top-level encrypted namespace)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(pub Uuid);

impl VolumeId {
    pub fn generate() -> Self {
        VolumeId(Uuid::new_v4())
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a node within a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a share (the key-hierarchy root of a subtree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareId(pub Uuid);

impl ShareId {
    pub fn generate() -> Self {
        ShareId(Uuid::new_v4())
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of an account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressId(pub String);

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fully qualified node address: `(volume, node)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentifier {
    pub volume: VolumeId,
    pub node: NodeId,
}

impl NodeIdentifier {
    pub fn new(volume: VolumeId, node: NodeId) -> Self {
        Self { volume, node }
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.volume, self.node)
    }
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Draft,
    Active,
    Trashed,
    Deleted,
}

/// Whether a node is folder-like (carries a hash key) or file-like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Folder,
    File,
}

/// A file or folder entity in the encrypted hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeIdentifier,
    /// Parent node within the same volume. `None` only for share roots.
    pub parent: Option<NodeId>,
    /// Set only on share roots; names the share this subtree hangs off.
    pub share: Option<ShareId>,
    pub kind: NodeKind,
    pub state: NodeState,
    /// Name ciphertext, encrypted under the parent's secret
    pub encrypted_name: Vec<u8>,
    /// Signature over the cleartext name. `None` on legacy records.
    pub name_signature: Option<Signature>,
    /// Identity that signed name/passphrase. `None` = anonymous uploader.
    pub signature_email: Option<String>,
    /// Deterministic hash of the cleartext name under the parent's hash
    /// key, for uniqueness checks within the parent
    pub name_hash: String,
    /// The node's passphrase, encrypted under the parent's secret
    /// (share-root passphrases live on the Share instead)
    pub encrypted_passphrase: Vec<u8>,
    /// Folder hash key, encrypted under this node's own secret.
    /// Present exactly on folder-like nodes.
    pub encrypted_hash_key: Option<Vec<u8>>,
    pub size: u64,
    pub mime_type: Option<String>,
    /// Digest of the current revision's content, where the server
    /// provides one (photo-like files)
    pub content_digest: Option<String>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn is_anonymous(&self) -> bool {
        self.signature_email.as_deref().map_or(true, |e| e.is_empty())
    }
}

/// Root of a key hierarchy for a subtree of nodes within one volume
///
/// The share's creator address key is the ultimate trust anchor for every
/// node under it: the root passphrase is wrapped to that address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub volume: VolumeId,
    /// The root node of this share's subtree
    pub root: NodeId,
    /// Address that owns/created the share
    pub address_id: AddressId,
    pub creator_email: String,
    /// Root passphrase wrapped to the address key
    pub passphrase: SecretShare,
}

/// Class of a volume's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeKind {
    Main,
    Photo,
    SharedWithMe,
}

/// A top-level encrypted namespace, owning one or more shares
///
/// Scheduling-relevant attributes (ownership class, activity, background
/// state) belong to the event-loop state, not to this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub kind: VolumeKind,
}

/// Content-addressed unit of a file revision
///
/// `sha256` is the declared hash of the *ciphertext*; the locally computed
/// hash of downloaded bytes must equal it before the block is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u32,
    pub sha256: [u8; 32],
    pub download_url: String,
    pub enc_signature: Option<Vec<u8>>,
    pub signature_email: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_anonymous_detection() {
        let id = NodeIdentifier::new(VolumeId::generate(), NodeId::generate());
        let mut node = Node {
            id,
            parent: Some(NodeId::generate()),
            share: None,
            kind: NodeKind::File,
            state: NodeState::Active,
            encrypted_name: vec![],
            name_signature: None,
            signature_email: None,
            name_hash: String::new(),
            encrypted_passphrase: vec![],
            encrypted_hash_key: None,
            size: 0,
            mime_type: None,
            content_digest: None,
        };
        assert!(node.is_anonymous());

        node.signature_email = Some(String::new());
        assert!(node.is_anonymous());

        node.signature_email = Some("user@example.com".into());
        assert!(!node.is_anonymous());
    }

    #[test]
    fn test_identifier_display() {
        let id = NodeIdentifier::new(VolumeId::generate(), NodeId::generate());
        let shown = id.to_string();
        assert!(shown.contains('/'));
    }
}
