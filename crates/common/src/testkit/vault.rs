use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::RecordingMonitor;
use crate::crypto::{HashKey, NodeKeys, Secret, SecretKey, SecretShare};
use crate::node::{
    AddressId, Node, NodeId, NodeIdentifier, NodeKind, NodeState, Share, ShareId, VolumeId,
};
use crate::resolver::{AddressKeys, KeyChainResolver, ResolverError, SignerResolver};
use crate::store::{MemoryNodeStore, NodeStore};

/// Map-backed signer resolver
#[derive(Debug, Clone, Default)]
pub struct MapSignerResolver {
    inner: Arc<RwLock<HashMap<AddressId, AddressKeys>>>,
}

impl MapSignerResolver {
    pub fn insert(&self, keys: AddressKeys) {
        self.inner.write().insert(keys.address_id.clone(), keys);
    }

    pub fn remove(&self, address_id: &AddressId) {
        self.inner.write().remove(address_id);
    }
}

impl SignerResolver for MapSignerResolver {
    fn resolve(&self, address_id: &AddressId) -> Result<AddressKeys, ResolverError> {
        self.inner
            .read()
            .get(address_id)
            .cloned()
            .ok_or_else(|| ResolverError::MissingAddressKeys(address_id.clone()))
    }
}

/// A whole test account: address keys, one volume with one share, and a
/// store that fixture nodes land in
pub struct TestVault {
    pub store: MemoryNodeStore,
    pub signers: MapSignerResolver,
    pub monitor: RecordingMonitor,
    pub address_id: AddressId,
    pub address_key: SecretKey,
    pub volume: VolumeId,
    pub share: Share,
    root: NodeIdentifier,
    // cleartext key material, so fixtures can encrypt children without
    // going through resolution
    keys: HashMap<NodeIdentifier, NodeKeys>,
    hash_keys: HashMap<NodeIdentifier, HashKey>,
}

impl TestVault {
    pub async fn new() -> Self {
        let store = MemoryNodeStore::new();
        let signers = MapSignerResolver::default();
        let monitor = RecordingMonitor::default();

        let address_id = AddressId("test-address".to_string());
        let address_key = SecretKey::generate();
        signers.insert(AddressKeys {
            address_id: address_id.clone(),
            email: "alice@example.com".to_string(),
            verification_keys: vec![address_key.public()],
            secret: Some(address_key.clone()),
        });

        let volume = VolumeId::generate();
        let share_id = ShareId::generate();
        let root_id = NodeIdentifier::new(volume, NodeId::generate());

        // Share passphrase, wrapped to the address key
        let share_passphrase = Secret::generate();
        let share_keys = NodeKeys::derive(share_passphrase.bytes()).expect("derive share keys");
        let share = Share {
            id: share_id,
            volume,
            root: root_id.node,
            address_id: address_id.clone(),
            creator_email: "alice@example.com".to_string(),
            passphrase: SecretShare::new(&share_passphrase, &address_key.public())
                .expect("wrap share passphrase"),
        };
        store.upsert_share(share.clone()).await.expect("seed share");

        let mut vault = Self {
            store,
            signers,
            monitor,
            address_id,
            address_key,
            volume,
            share,
            root: root_id,
            keys: HashMap::new(),
            hash_keys: HashMap::new(),
        };

        // Root folder, encrypted under the share keys
        let root_passphrase = NodeKeys::generate_passphrase();
        let root_keys = NodeKeys::derive(&root_passphrase).expect("derive root keys");
        let root_hash_key = HashKey::generate();
        let root_node = Node {
            id: root_id,
            parent: None,
            share: Some(share_id),
            kind: NodeKind::Folder,
            state: NodeState::Active,
            encrypted_name: share_keys.secret().encrypt(b"root").expect("encrypt root name"),
            name_signature: Some(vault.address_key.sign(b"root")),
            signature_email: Some("alice@example.com".to_string()),
            name_hash: blake3::hash(b"root").to_hex().to_string(),
            encrypted_passphrase: share_keys
                .secret()
                .encrypt(&root_passphrase)
                .expect("encrypt root passphrase"),
            encrypted_hash_key: Some(
                root_keys
                    .secret()
                    .encrypt(root_hash_key.bytes())
                    .expect("encrypt root hash key"),
            ),
            size: 0,
            mime_type: None,
            content_digest: None,
        };
        vault
            .store
            .apply_events(vec![root_node], vec![])
            .await
            .expect("seed root");
        vault.keys.insert(root_id, root_keys);
        vault.hash_keys.insert(root_id, root_hash_key);

        vault
    }

    pub fn root(&self) -> NodeIdentifier {
        self.root
    }

    /// A fresh resolver over this vault's store and keys
    pub fn resolver(&self) -> KeyChainResolver<MemoryNodeStore, MapSignerResolver, RecordingMonitor> {
        KeyChainResolver::new(self.store.clone(), self.signers.clone(), self.monitor.clone())
    }

    /// Cleartext key material of a fixture node
    pub fn node_keys(&self, id: &NodeIdentifier) -> &NodeKeys {
        self.keys.get(id).expect("fixture node keys")
    }

    pub async fn add_folder(&mut self, parent: NodeIdentifier, name: &str) -> NodeIdentifier {
        self.add_node(parent, name, NodeKind::Folder, 0, None, false).await
    }

    pub async fn add_file(
        &mut self,
        parent: NodeIdentifier,
        name: &str,
        size: u64,
    ) -> NodeIdentifier {
        self.add_node(parent, name, NodeKind::File, size, None, false).await
    }

    /// A file carrying a content digest (photo-like)
    pub async fn add_photo(
        &mut self,
        parent: NodeIdentifier,
        name: &str,
        digest: &str,
    ) -> NodeIdentifier {
        self.add_node(parent, name, NodeKind::File, 0, Some(digest.to_string()), false)
            .await
    }

    /// A file whose name is self-signed with the node key and carries no
    /// signer identity
    pub async fn add_anonymous_file(
        &mut self,
        parent: NodeIdentifier,
        name: &str,
    ) -> NodeIdentifier {
        self.add_node(parent, name, NodeKind::File, 0, None, true).await
    }

    async fn add_node(
        &mut self,
        parent: NodeIdentifier,
        name: &str,
        kind: NodeKind,
        size: u64,
        content_digest: Option<String>,
        anonymous: bool,
    ) -> NodeIdentifier {
        let parent_keys = self.keys.get(&parent).expect("parent fixture keys").clone();
        let parent_hash_key = self
            .hash_keys
            .get(&parent)
            .expect("parent is not a folder")
            .clone();

        let id = NodeIdentifier::new(self.volume, NodeId::generate());
        let passphrase = NodeKeys::generate_passphrase();
        let keys = NodeKeys::derive(&passphrase).expect("derive node keys");

        let (signature, signature_email) = if anonymous {
            (keys.sign(name.as_bytes()), None)
        } else {
            (
                self.address_key.sign(name.as_bytes()),
                Some("alice@example.com".to_string()),
            )
        };

        let encrypted_hash_key = match kind {
            NodeKind::Folder => {
                let hash_key = HashKey::generate();
                let encrypted = keys
                    .secret()
                    .encrypt(hash_key.bytes())
                    .expect("encrypt hash key");
                self.hash_keys.insert(id, hash_key);
                Some(encrypted)
            }
            NodeKind::File => None,
        };

        let node = Node {
            id,
            parent: Some(parent.node),
            share: None,
            kind,
            state: NodeState::Active,
            encrypted_name: parent_keys
                .secret()
                .encrypt(name.as_bytes())
                .expect("encrypt name"),
            name_signature: Some(signature),
            signature_email,
            name_hash: parent_hash_key.name_hash(name),
            encrypted_passphrase: parent_keys
                .secret()
                .encrypt(&passphrase)
                .expect("encrypt passphrase"),
            encrypted_hash_key,
            size,
            mime_type: None,
            content_digest,
        };

        self.store
            .apply_events(vec![node], vec![])
            .await
            .expect("seed node");
        self.keys.insert(id, keys);
        id
    }

    /// Corrupt a node's stored passphrase ciphertext in place
    pub async fn corrupt_passphrase(&self, id: &NodeIdentifier) {
        let mut node = self.store.node_or_err(id).await.expect("fixture node");
        for byte in node.encrypted_passphrase.iter_mut().skip(12) {
            *byte ^= 0xFF;
        }
        self.store
            .apply_events(vec![node], vec![])
            .await
            .expect("corrupt node");
    }

    /// Drop a node's parent record entirely, producing an orphan
    pub async fn orphan(&self, id: &NodeIdentifier) {
        let node = self.store.node_or_err(id).await.expect("fixture node");
        let parent = node.parent.expect("node has a parent");
        self.store.remove_node(&NodeIdentifier::new(id.volume, parent));
    }
}
