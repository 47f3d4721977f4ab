//! Signed membership manifests.
//!
//! A manifest is the root of trust for rotation. It is signed with a MAC
//! keyed by the data space's active key, so any member can re-sign it; the
//! trust boundary is membership in the space, not per-user identity.

use serde::{Deserialize, Serialize};

use crate::canonical::manifest_bytes;
use crate::crypto::SymmetricKey;
use crate::error::{CoreError, Result};
use crate::types::{SpaceHandle, UserId};

/// Signed membership snapshot of a data space.
///
/// JSON shape: `{ "users": [...], "signature": "<hex>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Members of the space, in the order they were recorded.
    pub users: Vec<UserId>,

    /// Hex-encoded Blake3 keyed hash over the canonical manifest bytes.
    pub signature: String,
}

impl Manifest {
    /// Sign a member list under `key`.
    pub fn sign(handle: &SpaceHandle, users: Vec<UserId>, key: &SymmetricKey) -> Self {
        let tag = key.mac(&manifest_bytes(handle, &users));
        Self {
            users,
            signature: tag.to_hex().to_string(),
        }
    }

    /// Verify the signature under `key`.
    pub fn verify(&self, handle: &SpaceHandle, key: &SymmetricKey) -> Result<()> {
        let tag: [u8; 32] = hex::decode(&self.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(CoreError::ManifestSignatureInvalid)?;

        if key.verify_mac(&manifest_bytes(handle, &self.users), &tag) {
            Ok(())
        } else {
            Err(CoreError::ManifestSignatureInvalid)
        }
    }

    /// Re-sign the same member list under a new key.
    pub fn resign(&self, handle: &SpaceHandle, key: &SymmetricKey) -> Self {
        Self::sign(handle, self.users.clone(), key)
    }

    /// Whether `user` is a member.
    pub fn contains(&self, user: &UserId) -> bool {
        self.users.contains(user)
    }

    /// Members other than `me`, deduplicated, in manifest order.
    pub fn others<'a>(&'a self, me: &'a UserId) -> impl Iterator<Item = &'a UserId> + 'a {
        self.users
            .iter()
            .enumerate()
            .filter(move |(i, u)| *u != me && !self.users[..*i].contains(u))
            .map(|(_, u)| u)
    }
}
