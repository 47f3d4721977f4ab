//! Symmetric cryptography for sealpipe.
//!
//! Provides ChaCha20-Poly1305 sealing with the key id bound as associated
//! data, and Blake3 keyed hashing for manifest signatures.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};
use crate::types::KeyId;

/// The only supported symmetric key size.
pub const KEY_BITS: u32 = 256;

/// A 256-bit symmetric key.
///
/// Deliberately has no `Serialize` impl: raw key material only leaves a
/// key store wrapped by another key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Generate a new random key of the given size.
    pub fn generate(bits: u32) -> Result<Self> {
        if bits != KEY_BITS {
            return Err(CoreError::UnsupportedKeySize(bits));
        }
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(Self(bytes))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::Decoding(format!("invalid key length: expected 32, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Seal plaintext under this key, binding `key_id` as associated data.
    pub fn seal(&self, key_id: &KeyId, plaintext: &[u8]) -> Result<Sealed> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CoreError::EncryptionFailed(e.to_string()))?;

        let nonce = EncryptionNonce::generate();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad: key_id.as_str().as_bytes(),
                },
            )
            .map_err(|e| CoreError::EncryptionFailed(e.to_string()))?;

        Ok(Sealed {
            key_id: key_id.clone(),
            nonce,
            ciphertext,
        })
    }

    /// Open a sealed envelope produced under this key.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CoreError::DecryptionFailed(e.to_string()))?;

        cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce.0),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: sealed.key_id.as_str().as_bytes(),
                },
            )
            .map_err(|_| CoreError::DecryptionFailed(format!("envelope under {}", sealed.key_id)))
    }

    /// Compute a keyed MAC over `data`.
    pub fn mac(&self, data: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.0, data)
    }

    /// Verify a MAC produced by [`SymmetricKey::mac`].
    ///
    /// `blake3::Hash` equality is constant-time.
    pub fn verify_mac(&self, data: &[u8], tag: &[u8; 32]) -> bool {
        self.mac(data) == blake3::Hash::from(*tag)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(#[serde(with = "hex_array")] pub [u8; 12]);

impl EncryptionNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// Ciphertext tagged with the id of the key that sealed it.
///
/// The tag is what makes rotation idempotent: an envelope already under the
/// target key is recognized and left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    /// Key the envelope was sealed under.
    pub key_id: KeyId,

    /// Nonce used for encryption.
    pub nonce: EncryptionNonce,

    /// The encrypted data (includes authentication tag).
    #[serde(with = "hex_vec")]
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Whether this envelope was sealed under `key_id`.
    pub fn is_under(&self, key_id: &KeyId) -> bool {
        &self.key_id == key_id
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

/// Move a sealed envelope from `old` to `new`.
///
/// Returns the input unchanged when it is already under `new`, so applying
/// this twice yields the same ciphertext as applying it once.
pub fn reseal(
    sealed: &Sealed,
    old_id: &KeyId,
    old_key: &SymmetricKey,
    new_id: &KeyId,
    new_key: &SymmetricKey,
) -> Result<Sealed> {
    if sealed.is_under(new_id) {
        return Ok(sealed.clone());
    }
    if !sealed.is_under(old_id) {
        return Err(CoreError::KeyMismatch {
            expected: old_id.clone(),
            found: sealed.key_id.clone(),
        });
    }
    let plaintext = old_key.open(sealed)?;
    new_key.seal(new_id, &plaintext)
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 12], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 12], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be 12 bytes"))
    }
}
