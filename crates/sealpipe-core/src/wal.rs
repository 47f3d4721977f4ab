//! The WAL: persisted, replayable description of one transformation step.
//!
//! A WAL never embeds raw table/column names or literal values in its
//! statement templates. Identifiers are interned under small integer keys,
//! and literals are interned as references to encrypted registry entries.
//! Keys are never renumbered once assigned, so templates stay valid as the
//! WAL grows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Sealed;
use crate::error::{CoreError, Result};
use crate::intern::{intern, next_key, ReverseIndex};
use crate::keystore::KeyStore;
use crate::types::{ContentId, KeyId};

/// Whether an identifier names a table or a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Table,
    Column,
}

/// Schema change attached to an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierAction {
    Add,
    Drop,
    Alter,
}

/// A table or column referenced by a transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    /// The raw name.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: IdentifierKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<IdentifierAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<serde_json::Value>>,
}

impl Identifier {
    /// A table identifier.
    pub fn table(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IdentifierKind::Table,
            action: None,
            params: None,
        }
    }

    /// A column identifier.
    pub fn column(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IdentifierKind::Column,
            action: None,
            params: None,
        }
    }

    /// Attach a schema action.
    pub fn with_action(mut self, action: IdentifierAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach action parameters.
    pub fn with_params(mut self, params: Vec<serde_json::Value>) -> Self {
        self.params = Some(params);
        self
    }
}

/// Body of an artifact: either plain engine output or sealed under the
/// space key when it is shared internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "encoding", content = "body")]
pub enum ArtifactBody {
    Plain(serde_json::Value),
    Sealed(Sealed),
}

/// Opaque side effect produced by executing a transaction.
///
/// Stored so the effect can be replayed without re-deriving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Engine that produced the artifact and knows how to apply it.
    pub engine: String,

    #[serde(flatten)]
    pub body: ArtifactBody,
}

impl Artifact {
    /// A plain artifact.
    pub fn plain(engine: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            engine: engine.into(),
            body: ArtifactBody::Plain(body),
        }
    }

    /// An artifact sealed under the space key.
    pub fn sealed(engine: impl Into<String>, sealed: Sealed) -> Self {
        Self {
            engine: engine.into(),
            body: ArtifactBody::Sealed(sealed),
        }
    }

    /// The sealed body, if any.
    pub fn sealed_body(&self) -> Option<&Sealed> {
        match &self.body {
            ArtifactBody::Sealed(s) => Some(s),
            ArtifactBody::Plain(_) => None,
        }
    }
}

/// Write-ahead log of one transformation step.
///
/// JSON shape:
/// `{ identifiers: {<int>: {id, type, action?, params?}}, values: {<int>: <content-id>},
///    transactions: [<string>], artifacts: [<opaque>], data?: <ciphertext> }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wal {
    #[serde(default)]
    pub identifiers: BTreeMap<u32, Identifier>,

    #[serde(default)]
    pub values: BTreeMap<u32, ContentId>,

    #[serde(default)]
    pub transactions: Vec<String>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    /// Sensitive payload (e.g. privacy-preserving results), sealed under the
    /// space key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Sealed>,
}

impl Wal {
    /// Create an empty WAL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern new table and column ids, returning the raw id to key index.
    pub fn intern_identifiers(&mut self, tables: &[&str], columns: &[&str]) -> Result<ReverseIndex> {
        let (updated, index) = intern(&self.identifiers, tables, columns)?;
        self.identifiers = updated;
        Ok(index)
    }

    /// Intern a value reference, reusing the key of a known content id.
    pub fn intern_value(&mut self, content_id: ContentId) -> Result<u32> {
        if let Some((&key, _)) = self.values.iter().find(|(_, c)| **c == content_id) {
            return Ok(key);
        }
        let key = next_key(self.values.keys()).ok_or(CoreError::KeysExhausted("values"))?;
        self.values.insert(key, content_id);
        Ok(key)
    }

    /// Append a statement template.
    pub fn push_transaction(&mut self, template: impl Into<String>) {
        self.transactions.push(template.into());
    }

    /// Append an artifact.
    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Replace the sensitive payload.
    pub fn set_data(&mut self, sealed: Sealed) {
        self.data = Some(sealed);
    }

    /// Every sealed part: `data` first, then sealed artifacts in order.
    pub fn sealed_parts(&self) -> impl Iterator<Item = &Sealed> {
        self.data
            .iter()
            .chain(self.artifacts.iter().filter_map(Artifact::sealed_body))
    }

    /// Whether the WAL holds anything that rotation has to reseal.
    pub fn has_sealed_content(&self) -> bool {
        self.sealed_parts().next().is_some()
    }

    /// Whether every sealed part is already under `key_id`.
    pub fn is_sealed_under(&self, key_id: &KeyId) -> bool {
        self.sealed_parts().all(|s| s.is_under(key_id))
    }

    /// Copy of the WAL with every sealed part replaced by `f(part)`.
    ///
    /// Templates, identifiers and plain artifacts are carried over
    /// untouched.
    pub fn map_sealed<F>(&self, mut f: F) -> Result<Wal>
    where
        F: FnMut(&Sealed) -> Result<Sealed>,
    {
        let data = self.data.as_ref().map(&mut f).transpose()?;

        let mut artifacts = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            artifacts.push(match &artifact.body {
                ArtifactBody::Sealed(s) => Artifact::sealed(artifact.engine.clone(), f(s)?),
                ArtifactBody::Plain(_) => artifact.clone(),
            });
        }

        Ok(Wal {
            identifiers: self.identifiers.clone(),
            values: self.values.clone(),
            transactions: self.transactions.clone(),
            artifacts,
            data,
        })
    }

    /// Build the replacement WAL for a rotation from `old` to `new`.
    pub fn resealed<K: KeyStore + ?Sized>(&self, keys: &K, old: &KeyId, new: &KeyId) -> Result<Wal> {
        self.map_sealed(|s| keys.reseal(s, old, new))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SymmetricKey, KEY_BITS};
    use serde_json::json;

    #[test]
    fn test_json_shape() {
        let mut wal = Wal::new();
        wal.intern_identifiers(&["tbl"], &["col"]).unwrap();
        wal.intern_value(ContentId::from("c1")).unwrap();
        wal.push_transaction("SELECT %2$I FROM %1$I WHERE %2$I = $1");

        let json: serde_json::Value = serde_json::from_str(&wal.to_json().unwrap()).unwrap();
        assert_eq!(json["identifiers"]["1"], json!({"id": "tbl", "type": "table"}));
        assert_eq!(json["identifiers"]["2"], json!({"id": "col", "type": "column"}));
        assert_eq!(json["values"]["1"], "c1");
        assert_eq!(json["transactions"][0], "SELECT %2$I FROM %1$I WHERE %2$I = $1");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_parse_foreign_json() {
        let json = r#"{
            "identifiers": {"1": {"id": "orders", "type": "table"},
                            "2": {"id": "total", "type": "column", "action": "alter", "params": ["DOUBLE"]}},
            "values": {"1": "abc"},
            "transactions": ["UPDATE %1$I SET %2$I = $1"],
            "artifacts": [{"engine": "duck", "encoding": "plain", "body": {"op": "rewrite"}}]
        }"#;
        let wal = Wal::from_json(json).unwrap();

        assert_eq!(wal.identifiers[&2].action, Some(IdentifierAction::Alter));
        assert_eq!(wal.identifiers[&2].params, Some(vec![json!("DOUBLE")]));
        assert_eq!(wal.values[&1], ContentId::from("abc"));
        assert_eq!(wal.artifacts[0].engine, "duck");
        assert!(wal.data.is_none());
    }

    #[test]
    fn test_missing_fields_default() {
        let wal = Wal::from_json("{}").unwrap();
        assert_eq!(wal, Wal::new());
    }

    #[test]
    fn test_intern_value_reuses_key() {
        let mut wal = Wal::new();
        let a = wal.intern_value(ContentId::from("a")).unwrap();
        let b = wal.intern_value(ContentId::from("b")).unwrap();
        let again = wal.intern_value(ContentId::from("a")).unwrap();
        assert_eq!((a, b, again), (1, 2, 1));
    }

    #[test]
    fn test_intern_value_past_top_key_fails() {
        let mut wal = Wal::new();
        wal.values.insert(u32::MAX, ContentId::from("last"));

        assert_eq!(wal.intern_value(ContentId::from("last")).unwrap(), u32::MAX);
        assert!(matches!(
            wal.intern_value(ContentId::from("next")),
            Err(CoreError::KeysExhausted("values"))
        ));
        assert!(!wal.values.contains_key(&0));
    }

    struct OneShot {
        keys: Vec<(KeyId, SymmetricKey)>,
    }

    impl KeyStore for OneShot {
        fn generate_key(&self, _bits: u32) -> Result<KeyId> {
            unreachable!()
        }
        fn add_key(&self, key_id: &KeyId, _raw: &[u8]) -> Result<KeyId> {
            Ok(key_id.clone())
        }
        fn get_key(&self, key_id: &KeyId) -> Result<SymmetricKey> {
            self.keys
                .iter()
                .find(|(id, _)| id == key_id)
                .map(|(_, k)| k.clone())
                .ok_or_else(|| CoreError::KeyNotFound(key_id.clone()))
        }
    }

    #[test]
    fn test_resealed_touches_only_sealed_parts() {
        let old = KeyId::generate();
        let new = KeyId::generate();
        let keys = OneShot {
            keys: vec![
                (old.clone(), SymmetricKey::generate(KEY_BITS).unwrap()),
                (new.clone(), SymmetricKey::generate(KEY_BITS).unwrap()),
            ],
        };

        let mut wal = Wal::new();
        wal.intern_identifiers(&["t"], &["c"]).unwrap();
        wal.push_transaction("SELECT %2$I FROM %1$I");
        wal.push_artifact(Artifact::plain("duck", json!({"op": "noop"})));
        wal.push_artifact(Artifact::sealed("duck", keys.encrypt_bytes(&old, b"effect").unwrap()));
        wal.set_data(keys.encrypt_bytes(&old, b"dp-result").unwrap());
        assert!(wal.is_sealed_under(&old));

        let rotated = wal.resealed(&keys, &old, &new).unwrap();
        assert!(rotated.is_sealed_under(&new));
        assert_eq!(rotated.identifiers, wal.identifiers);
        assert_eq!(rotated.transactions, wal.transactions);
        assert_eq!(rotated.artifacts[0], wal.artifacts[0]);
        assert_eq!(
            keys.decrypt_bytes(&new, rotated.data.as_ref().unwrap()).unwrap(),
            b"dp-result"
        );

        let again = rotated.resealed(&keys, &old, &new).unwrap();
        assert_eq!(again, rotated);
    }
}
