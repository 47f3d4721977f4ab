//! Proptest generators for property-based testing.

use proptest::prelude::*;

use sealpipe_core::{ContentId, Identifier, KeyId, UserId, Wal};

/// A table or column id, including characters that need quoting.
pub fn identifier() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-z][a-z0-9_]{0,15}",
        1 => "[a-z][a-z \"]{0,10}",
    ]
}

/// A list of ids, possibly with repeats.
pub fn identifiers(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(identifier(), 0..=max)
}

/// A metadata plaintext.
pub fn plaintext() -> impl Strategy<Value = String> {
    ".{0,64}"
}

pub fn key_id() -> impl Strategy<Value = KeyId> {
    "[0-9a-f]{8}-[0-9a-f]{4}".prop_map(KeyId::from)
}

pub fn user_id() -> impl Strategy<Value = UserId> {
    "[a-z]{3,10}".prop_map(UserId::from)
}

/// A member list of `1..=max` distinct users.
pub fn members(max: usize) -> impl Strategy<Value = Vec<UserId>> {
    prop::collection::btree_set("[a-z]{3,10}", 1..=max)
        .prop_map(|set| set.into_iter().map(UserId::from).collect())
}

/// Parameters for building a WAL.
#[derive(Debug, Clone)]
pub struct WalParams {
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

impl Arbitrary for WalParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (identifiers(4), identifiers(6), prop::collection::vec("[a-z0-9]{4,12}", 0..4))
            .prop_map(|(tables, columns, values)| WalParams {
                tables,
                columns,
                values,
            })
            .boxed()
    }
}

/// Build a WAL by interning `params`, with one template touching every
/// interned key.
pub fn wal_from_params(params: &WalParams) -> Wal {
    let mut wal = Wal::new();
    let tables: Vec<&str> = params.tables.iter().map(String::as_str).collect();
    let columns: Vec<&str> = params.columns.iter().map(String::as_str).collect();
    wal.intern_identifiers(&tables, &columns)
        .expect("intern generated ids");
    for value in &params.values {
        wal.intern_value(ContentId::from(value.as_str()))
            .expect("intern generated value");
    }

    let template = wal
        .identifiers
        .keys()
        .map(|k| format!("%{k}$I"))
        .chain(wal.values.keys().map(|k| format!("${k}")))
        .collect::<Vec<_>>()
        .join(" ");
    wal.push_transaction(template);
    wal
}

/// Every interned identifier, in key order.
pub fn interned_ids(wal: &Wal) -> Vec<&Identifier> {
    wal.identifiers.values().collect()
}
