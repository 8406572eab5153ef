//! Cryptographic primitives for cryptdrive
//!
//! This module provides the foundation for the client's security model:
//!
//! - **Address identity**: Ed25519 keypairs per account address; the trust
//!   anchor of every share
//! - **Encryption**: ChaCha20-Poly1305 for metadata and content, with
//!   per-node key material
//! - **Key wrapping**: ECDH-based wrapping of share-root passphrases to
//!   address keys
//!
//! # Security Model
//!
//! ## The passphrase chain
//! Every node owns a 32-byte passphrase. From it, [`NodeKeys::derive`]
//! deterministically derives the node's symmetric [`Secret`] and its Ed25519
//! signing key. A node's passphrase is stored encrypted under its *parent's*
//! secret, so decrypting any node requires decrypting its whole ancestor
//! chain first. The chain bottoms out at a share root, whose passphrase is
//! wrapped to the owning address key as a [`SecretShare`].
//!
//! ## Name hashing
//! Folder-like nodes carry a hash key. Child names are stored alongside a
//! BLAKE3 keyed hash under the parent's hash key: deterministic within one
//! folder (uniqueness checks) and unlinkable across folders.
//!
//! ## Signatures
//! Node names are signed by the creating address key, or self-signed with
//! the node's own derived signing key for anonymous uploads.

mod keys;
mod secret;
mod secret_share;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use secret::{Secret, SecretError, BLAKE3_HASH_SIZE, NONCE_SIZE, SECRET_SIZE};
pub use secret_share::{SecretShare, SecretShareError, SECRET_SHARE_SIZE};

/// Size of a node passphrase in bytes
pub const PASSPHRASE_SIZE: usize = 32;
/// Size of a folder hash key in bytes
pub const HASH_KEY_SIZE: usize = 32;

const SECRET_DERIVE_CONTEXT: &str = "cryptdrive v1 node secret";
const SIGNING_DERIVE_CONTEXT: &str = "cryptdrive v1 node signing key";

/// A node's derived key material
///
/// Both keys come deterministically from the node's passphrase, so the
/// passphrase is the only thing that needs to travel encrypted in the
/// hierarchy.
#[derive(Debug, Clone)]
pub struct NodeKeys {
    secret: Secret,
    signing: SecretKey,
}

impl NodeKeys {
    /// Derive a node's key material from its cleartext passphrase
    ///
    /// Uses BLAKE3 `derive_key` with distinct context strings for the
    /// symmetric secret and the signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the passphrase is not exactly
    /// `PASSPHRASE_SIZE` bytes.
    pub fn derive(passphrase: &[u8]) -> Result<Self, SecretError> {
        if passphrase.len() != PASSPHRASE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid passphrase size, expected {}, got {}",
                PASSPHRASE_SIZE,
                passphrase.len()
            )
            .into());
        }
        let secret = Secret::from(blake3::derive_key(SECRET_DERIVE_CONTEXT, passphrase));
        let signing = SecretKey::from(blake3::derive_key(SIGNING_DERIVE_CONTEXT, passphrase));
        Ok(Self { secret, signing })
    }

    /// Generate a fresh random passphrase
    pub fn generate_passphrase() -> [u8; PASSPHRASE_SIZE] {
        let mut buff = [0u8; PASSPHRASE_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        buff
    }

    /// The node's symmetric secret
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// The public half of the node's derived signing key
    ///
    /// Anonymous uploads self-sign names with the node key, so this key
    /// participates in signature verification alongside address keys.
    pub fn verification_key(&self) -> PublicKey {
        self.signing.public()
    }

    /// Sign a message with the node's derived signing key
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing.sign(msg)
    }
}

/// Per-folder secret for hashing child names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashKey([u8; HASH_KEY_SIZE]);

impl From<[u8; HASH_KEY_SIZE]> for HashKey {
    fn from(bytes: [u8; HASH_KEY_SIZE]) -> Self {
        HashKey(bytes)
    }
}

impl HashKey {
    /// Generate a fresh random hash key
    pub fn generate() -> Self {
        let mut buff = [0u8; HASH_KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        HashKey(buff)
    }

    /// Create a hash key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `HASH_KEY_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != HASH_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid hash key size, expected {}, got {}",
                HASH_KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0u8; HASH_KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(HashKey(buff))
    }

    /// Get a reference to the raw key bytes
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Deterministic hash of a cleartext child name, scoped to this folder
    pub fn name_hash(&self, name: &str) -> String {
        blake3::keyed_hash(&self.0, name.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let passphrase = NodeKeys::generate_passphrase();
        let a = NodeKeys::derive(&passphrase).unwrap();
        let b = NodeKeys::derive(&passphrase).unwrap();

        assert_eq!(a.secret(), b.secret());
        assert_eq!(a.verification_key(), b.verification_key());
    }

    #[test]
    fn test_derive_separates_contexts() {
        let passphrase = NodeKeys::generate_passphrase();
        let keys = NodeKeys::derive(&passphrase).unwrap();

        // The signing key must not be the same bytes as the secret
        assert_ne!(keys.secret().bytes(), passphrase.as_slice());
        assert_ne!(
            keys.secret().bytes(),
            blake3::derive_key(SIGNING_DERIVE_CONTEXT, &passphrase).as_slice()
        );
    }

    #[test]
    fn test_derive_rejects_bad_length() {
        assert!(NodeKeys::derive(&[0u8; 16]).is_err());
        assert!(NodeKeys::derive(&[]).is_err());
    }

    #[test]
    fn test_name_hash_scoped_to_key() {
        let a = HashKey::generate();
        let b = HashKey::generate();

        assert_eq!(a.name_hash("report.pdf"), a.name_hash("report.pdf"));
        assert_ne!(a.name_hash("report.pdf"), b.name_hash("report.pdf"));
        assert_ne!(a.name_hash("report.pdf"), a.name_hash("report2.pdf"));
    }

    #[test]
    fn test_self_signature_verifies() {
        let keys = NodeKeys::derive(&NodeKeys::generate_passphrase()).unwrap();
        let signature = keys.sign(b"anonymous upload");
        assert!(keys
            .verification_key()
            .verify(b"anonymous upload", &signature)
            .is_ok());
    }
}
