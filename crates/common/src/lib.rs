/**
 * Cryptographic types and operations.
 *  - Address and node key implementations
 *  - Key-to-address key wrapping for share roots
 *  - Node key-material derivation
 */
pub mod crypto;
/**
 * Integrity monitoring seam.
 * Tamper detection and signature failures are reported
 *  here, on a channel distinct from ordinary error logs.
 */
pub mod integrity;
/**
 * Common types that describe the encrypted metadata
 *  hierarchy: volumes, shares, nodes and content blocks.
 */
pub mod node;
/**
 * Key-chain resolution: walks a node's ownership chain
 *  up to its share root and folds decryption back down,
 *  producing verified cleartext material for one node.
 */
pub mod resolver;
/**
 * Storage layer abstraction.
 *  A light trait over whatever persists the local
 *  metadata cache, plus an in-memory implementation.
 */
pub mod store;
/**
 * Fixtures for building realistic encrypted trees
 *  in tests, in this crate and downstream.
 */
pub mod testkit;
/**
 * Block-level content verification: hash-check
 *  downloaded ciphertext before trusting or
 *  decrypting it.
 */
pub mod verify;

pub mod prelude {
    pub use crate::crypto::{NodeKeys, PublicKey, Secret, SecretKey, SecretShare};
    pub use crate::integrity::IntegrityMonitor;
    pub use crate::node::{Node, NodeIdentifier, NodeId, NodeState, Share, Volume, VolumeId};
    pub use crate::resolver::{KeyChainResolver, NodeCryptoMaterial};
    pub use crate::store::{MemoryNodeStore, NodeStore};
    pub use crate::verify::ContentVerifier;
}
