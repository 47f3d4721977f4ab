//! Identifier interning.
//!
//! Templates are persisted and replayed by other clients, so the numbering
//! scheme is fixed: the next key is `max(existing) + 1`, starting at 1. Key
//! `0` is reserved and never assigned, and keys never wrap.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::wal::Identifier;

/// Map from raw identifier to its interned key.
pub type ReverseIndex = BTreeMap<String, u32>;

/// Next free key after `keys`; 1 if there are none, `None` past `u32::MAX`.
pub(crate) fn next_key<'a>(keys: impl IntoIterator<Item = &'a u32>) -> Option<u32> {
    keys.into_iter().copied().max().map_or(Some(1), |max| max.checked_add(1))
}

/// Intern new table and column ids into `existing`.
///
/// Tables are assigned before columns, each in input order. An id already
/// present under any key keeps that key; repeated ids in the input get a
/// single key. The reverse index covers every id in the result.
///
/// Deterministic and side-effect free: two clients starting from the same
/// state arrive at the same numbering. Fails with
/// [`CoreError::KeysExhausted`] if a new id would need a key past
/// `u32::MAX`.
pub fn intern(
    existing: &BTreeMap<u32, Identifier>,
    tables: &[&str],
    columns: &[&str],
) -> Result<(BTreeMap<u32, Identifier>, ReverseIndex)> {
    let mut updated = existing.clone();
    let mut index: ReverseIndex = ReverseIndex::new();

    // Lowest key wins if a foreign WAL holds the same id twice.
    for (&key, ident) in existing.iter().rev() {
        index.insert(ident.id.clone(), key);
    }

    let mut next = next_key(existing.keys());

    let new_ids = tables
        .iter()
        .map(|t| Identifier::table(*t))
        .chain(columns.iter().map(|c| Identifier::column(*c)));

    for ident in new_ids {
        if index.contains_key(&ident.id) {
            continue;
        }
        let key = next.ok_or(CoreError::KeysExhausted("identifiers"))?;
        index.insert(ident.id.clone(), key);
        updated.insert(key, ident);
        next = key.checked_add(1);
    }

    Ok((updated, index))
}
