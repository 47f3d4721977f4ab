//! Materialization of WAL statement templates.
//!
//! Turns a template plus the current key material into an executable
//! statement. Two placeholder forms are recognized:
//!
//! - `%<n>$I`: the identifier interned under `n`, double-quoted
//! - `$<n>`: the literal interned under `n`, decrypted and substituted raw
//!
//! A `$<n>` directly preceded or followed by `$` is not a placeholder. The
//! digit run is always taken whole.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::Sealed;
use crate::error::Result;
use crate::keystore::KeyStore;
use crate::types::{ContentId, KeyId};
use crate::wal::Wal;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%(\d+)\$I|\$(\d+)").expect("valid placeholder pattern"))
}

/// Encrypted literal values, keyed by content id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueRegistry(BTreeMap<ContentId, Sealed>);

impl ValueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, content_id: &ContentId) -> Option<&Sealed> {
        self.0.get(content_id)
    }

    pub fn insert(&mut self, content_id: ContentId, sealed: Sealed) {
        self.0.insert(content_id, sealed);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentId, &Sealed)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encrypt a literal under `key_id` and register it under a fresh id.
    pub fn seal_value<K: KeyStore + ?Sized>(
        &mut self,
        keys: &K,
        key_id: &KeyId,
        plaintext: &str,
    ) -> Result<ContentId> {
        let sealed = keys.encrypt_metadata(key_id, plaintext)?;
        let content_id = ContentId::generate();
        self.0.insert(content_id.clone(), sealed);
        Ok(content_id)
    }
}

impl FromIterator<(ContentId, Sealed)> for ValueRegistry {
    fn from_iter<I: IntoIterator<Item = (ContentId, Sealed)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Keys referenced by a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    pub identifiers: BTreeSet<u32>,
    pub values: BTreeSet<u32>,
}

enum Placeholder {
    Identifier(u32),
    Value(u32),
}

/// Classify a regex match, applying the `$` neighbour rules.
fn classify(template: &str, caps: &Captures<'_>) -> Option<Placeholder> {
    if let Some(n) = caps.get(1) {
        return n.as_str().parse().ok().map(Placeholder::Identifier);
    }
    let whole = caps.get(0)?;
    let bytes = template.as_bytes();
    if whole.start() > 0 && bytes[whole.start() - 1] == b'$' {
        return None;
    }
    if bytes.get(whole.end()) == Some(&b'$') {
        return None;
    }
    caps.get(2)?.as_str().parse().ok().map(Placeholder::Value)
}

/// List the identifier and value keys a template refers to.
pub fn placeholders(template: &str) -> Placeholders {
    let mut found = Placeholders::default();
    for caps in placeholder_pattern().captures_iter(template) {
        match classify(template, &caps) {
            Some(Placeholder::Identifier(n)) => {
                found.identifiers.insert(n);
            }
            Some(Placeholder::Value(n)) => {
                found.values.insert(n);
            }
            None => {}
        }
    }
    found
}

/// Quote an identifier SQL-style.
fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

/// Resolve a template against a WAL and the current key material.
///
/// Unresolvable placeholders (unknown identifier key, value key missing
/// from the WAL or registry) are logged and left verbatim; the statement
/// is still returned. Key store failures (`KeyNotFound`,
/// `DecryptionFailed`) abort with an error.
///
/// Never mutates its inputs and may be called concurrently.
pub fn materialize<K: KeyStore + ?Sized>(
    template: &str,
    wal: &Wal,
    registry: &ValueRegistry,
    active_key_id: &KeyId,
    keys: &K,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_pattern().captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let replacement = match classify(template, &caps) {
            Some(Placeholder::Identifier(n)) => match wal.identifiers.get(&n) {
                Some(ident) => Some(quote_ident(&ident.id)),
                None => {
                    warn!(key = n, "identifier placeholder has no interned identifier");
                    None
                }
            },
            Some(Placeholder::Value(n)) => {
                match wal.values.get(&n).and_then(|cid| registry.get(cid)) {
                    Some(sealed) => Some(keys.decrypt_metadata(active_key_id, sealed)?),
                    None => {
                        warn!(
                            key = n,
                            content_id = ?wal.values.get(&n),
                            "missing value reference, leaving placeholder in place"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(text) = replacement {
            out.push_str(&template[last..whole.start()]);
            out.push_str(&text);
            last = whole.end();
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}
