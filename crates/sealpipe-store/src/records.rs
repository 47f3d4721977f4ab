//! Records held by the collaboration backend.
//!
//! Everything sensitive is already a [`Sealed`] envelope by the time it
//! reaches one of these types; the backend only ever sees ciphertext.

use sealpipe_core::{ContentId, KeyId, Sealed, SpaceHandle, UserId, Wal};
use serde::{Deserialize, Serialize};

/// A collaborative tenancy boundary with exactly one active key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSpace {
    pub handle: SpaceHandle,
    pub active_key_id: KeyId,
}

/// An encrypted column metadata entry, also the backing of the value
/// registry that WAL value references point into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub content_id: ContentId,
    pub sealed: Sealed,
}

/// One entry of the concept taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub id: String,
    pub sealed: Sealed,
}

/// Who may read a widget's published content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessGrant {
    /// Anyone; content is stored in plaintext.
    Public,
    /// Space members; content is sealed under the space key.
    Internal,
}

/// Published widget content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "encoding", content = "body")]
pub enum WidgetContent {
    Plain(String),
    Sealed(Sealed),
}

/// A published chart or table widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub access: Vec<AccessGrant>,
    pub content: WidgetContent,
}

impl Widget {
    /// Whether any grant is key-encrypted.
    pub fn is_internal(&self) -> bool {
        self.access.contains(&AccessGrant::Internal)
    }

    /// The sealed content, if any.
    pub fn sealed(&self) -> Option<&Sealed> {
        match &self.content {
            WidgetContent::Sealed(s) => Some(s),
            WidgetContent::Plain(_) => None,
        }
    }
}

/// A transformation step and its WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerNode {
    pub id: String,
    pub wal: Wal,
}

impl TransformerNode {
    /// A node with an empty WAL.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            wal: Wal::new(),
        }
    }
}

/// A symmetric key encrypted for one recipient over the pairwise channel.
///
/// Wire shape: `{ key_id, owner, receiver, ciphertext, message_id? }` with
/// the ciphertext hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub key_id: KeyId,
    pub owner: UserId,
    pub receiver: UserId,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Secret {
    /// Whether `other` addresses the same share slot.
    pub fn same_slot(&self, other: &Secret) -> bool {
        self.key_id == other.key_id && self.owner == other.owner && self.receiver == other.receiver
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
