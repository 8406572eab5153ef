//! Key wrapping for share roots using ECDH + AES Key Wrap
//!
//! A share is the key-hierarchy root for a subtree of nodes. Its root
//! passphrase is wrapped to the owning address key, so only the address
//! holder can start the decryption chain:
//!
//! 1. **Generate ephemeral keypair**: Create a temporary Ed25519 keypair
//! 2. **Perform ECDH**: Convert keys to X25519 and compute shared secret
//! 3. **Wrap key**: Use AES-KW (RFC 3394) to encrypt the passphrase with the shared secret
//! 4. **Package**: `ephemeral_pubkey || wrapped_secret`
//!
//! The recipient reverses the steps with their address secret key. If
//! recovery fails, the wrap was made for a different address, was corrupted,
//! or was tampered with.

use std::convert::TryFrom;

use aes_kw::KekAes256 as Kek;
use serde::{Deserialize, Serialize};

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError, SECRET_SIZE};

/// Size of AES Key Wrap padding/nonce in bytes
pub const KW_NONCE_SIZE: usize = 8;
/// Total size of a wrapped share passphrase in bytes
///
/// Layout: ephemeral_pubkey (32) || wrapped_secret (40) = 72 bytes
/// AES-KW adds 8 bytes of padding to the 32-byte secret, resulting in 40 bytes
pub const SECRET_SHARE_SIZE: usize = PUBLIC_KEY_SIZE + SECRET_SIZE + KW_NONCE_SIZE;

/// Errors that can occur during wrapping or recovery
#[derive(Debug, thiserror::Error)]
pub enum SecretShareError {
    #[error("share error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// A share-root passphrase wrapped for a specific address
///
/// Contains an ephemeral public key and an AES-KW wrapped secret. Only the
/// address whose public key was used during creation can recover it.
///
/// # Wire Format
///
/// ```text
/// [ ephemeral_pubkey: 32 bytes ][ wrapped_secret: 40 bytes ]
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SecretShare(pub(crate) [u8; SECRET_SHARE_SIZE]);

impl Serialize for SecretShare {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretShare {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{Error, Visitor};
        use std::fmt;

        struct ShareVisitor;

        impl<'de> Visitor<'de> for ShareVisitor {
            type Value = SecretShare;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte array or sequence of SECRET_SHARE_SIZE")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v.len() != SECRET_SHARE_SIZE {
                    return Err(E::invalid_length(
                        v.len(),
                        &format!("expected {} bytes", SECRET_SHARE_SIZE).as_str(),
                    ));
                }
                let mut array = [0u8; SECRET_SHARE_SIZE];
                array.copy_from_slice(v);
                Ok(SecretShare(array))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                if bytes.len() != SECRET_SHARE_SIZE {
                    return Err(A::Error::invalid_length(
                        bytes.len(),
                        &format!("expected {} bytes", SECRET_SHARE_SIZE).as_str(),
                    ));
                }
                let mut array = [0u8; SECRET_SHARE_SIZE];
                array.copy_from_slice(&bytes);
                Ok(SecretShare(array))
            }
        }

        // Try bytes first (binary formats), fall back to seq (JSON)
        deserializer.deserialize_byte_buf(ShareVisitor)
    }
}

impl Default for SecretShare {
    fn default() -> Self {
        SecretShare([0; SECRET_SHARE_SIZE])
    }
}

impl From<[u8; SECRET_SHARE_SIZE]> for SecretShare {
    fn from(bytes: [u8; SECRET_SHARE_SIZE]) -> Self {
        SecretShare(bytes)
    }
}

impl TryFrom<&[u8]> for SecretShare {
    type Error = SecretShareError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid share size, expected {}, got {}",
                SECRET_SHARE_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut share = SecretShare::default();
        share.0.copy_from_slice(bytes);
        Ok(share)
    }
}

impl SecretShare {
    /// Wrap a secret for a specific address
    ///
    /// # Arguments
    ///
    /// * `secret` - The secret to wrap (a share's root passphrase)
    /// * `recipient` - The public key of the owning address
    ///
    /// # Errors
    ///
    /// Returns an error if key conversion or wrapping fails.
    pub fn new(secret: &Secret, recipient: &PublicKey) -> Result<Self, SecretShareError> {
        let ephemeral_private = SecretKey::generate();
        let ephemeral_public = ephemeral_private.public();

        let ephemeral_x25519_private = ephemeral_private.to_x25519();
        let recipient_x25519_public = recipient.to_x25519()?;

        let shared_secret = ephemeral_x25519_private.diffie_hellman(&recipient_x25519_public);

        // Use shared secret as KEK for AES-KW
        let mut shared_secret_bytes = [0; SECRET_SIZE];
        shared_secret_bytes.copy_from_slice(shared_secret.as_bytes());
        let kek = Kek::from(shared_secret_bytes);
        let wrapped = kek
            .wrap_vec(secret.bytes())
            .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

        let mut share = SecretShare::default();
        let ephemeral_bytes = ephemeral_public.to_bytes();

        if ephemeral_bytes.len() + wrapped.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!("expected share size is incorrect").into());
        };

        share.0[..PUBLIC_KEY_SIZE].copy_from_slice(&ephemeral_bytes);
        share.0[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + wrapped.len()].copy_from_slice(&wrapped);

        Ok(share)
    }

    /// Recover the wrapped secret using the address secret key
    ///
    /// # Errors
    ///
    /// Returns an error if key conversion fails, AES-KW unwrapping fails
    /// (wrong address or tampered data), or the unwrapped secret has the
    /// wrong size.
    pub fn recover(&self, recipient_secret: &SecretKey) -> Result<Secret, SecretShareError> {
        let ephemeral_public_bytes = &self.0[..PUBLIC_KEY_SIZE];
        let ephemeral_public = PublicKey::try_from(ephemeral_public_bytes)?;

        let recipient_x25519_private = recipient_secret.to_x25519();
        let ephemeral_x25519_public = ephemeral_public.to_x25519()?;

        let shared_secret = recipient_x25519_private.diffie_hellman(&ephemeral_x25519_public);

        let shared_secret_bytes = *shared_secret.as_bytes();
        let kek = Kek::from(shared_secret_bytes);
        let wrapped_data = &self.0[PUBLIC_KEY_SIZE..];

        let unwrapped = kek
            .unwrap_vec(wrapped_data)
            .map_err(|_| anyhow::anyhow!("AES-KW unwrap error"))?;

        if unwrapped.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!("unwrapped secret has wrong size").into());
        }

        let mut secret_bytes = [0; SECRET_SIZE];
        secret_bytes.copy_from_slice(&unwrapped);
        Ok(Secret::from(secret_bytes))
    }

    /// Get a reference to the raw share bytes
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_recover() {
        let secret = Secret::from_slice(&[42u8; SECRET_SIZE]).unwrap();
        let address_key = SecretKey::generate();
        let share = SecretShare::new(&secret, &address_key.public()).unwrap();
        let recovered = share.recover(&address_key).unwrap();
        assert_eq!(secret, recovered);
    }

    #[test]
    fn test_recover_wrong_address_fails() {
        let secret = Secret::generate();
        let owner = SecretKey::generate();
        let stranger = SecretKey::generate();

        let share = SecretShare::new(&secret, &owner.public()).unwrap();
        assert_eq!(share.recover(&owner).unwrap(), secret);
        assert!(share.recover(&stranger).is_err());
    }

    #[test]
    fn test_serde_json_roundtrip() {
        let secret = Secret::generate();
        let address_key = SecretKey::generate();
        let share = SecretShare::new(&secret, &address_key.public()).unwrap();

        let json = serde_json::to_string(&share).unwrap();
        let recovered: SecretShare = serde_json::from_str(&json).unwrap();

        assert_eq!(share, recovered);
        assert_eq!(recovered.recover(&address_key).unwrap(), secret);
    }
}
