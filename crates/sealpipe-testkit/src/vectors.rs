//! Golden materialization vectors.
//!
//! Templates are persisted and replayed by every client, so the same
//! template, WAL and values must resolve to the same statement everywhere.

use sealpipe_core::{materialize, ContentId, KeyStore, ValueRegistry, Wal, KEY_BITS};
use sealpipe_keystore::{LocalKeyStore, MemoryVault, VaultConfig};

/// A golden vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub tables: &'static [&'static str],
    pub columns: &'static [&'static str],
    /// Literal plaintexts, interned as values 1, 2, ...
    pub values: &'static [&'static str],
    pub template: &'static str,
    pub expected: &'static str,
}

/// Get all golden vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "table and column",
            tables: &["tbl"],
            columns: &["col"],
            values: &[],
            template: "SELECT %2$I FROM %1$I",
            expected: "SELECT \"col\" FROM \"tbl\"",
        },
        GoldenVector {
            name: "embedded quote",
            tables: &["we\"ird"],
            columns: &[],
            values: &[],
            template: "SELECT * FROM %1$I",
            expected: "SELECT * FROM \"we\"\"ird\"",
        },
        GoldenVector {
            name: "value literal",
            tables: &["sales"],
            columns: &["region"],
            values: &["'EU'"],
            template: "SELECT * FROM %1$I WHERE %2$I = $1",
            expected: "SELECT * FROM \"sales\" WHERE \"region\" = 'EU'",
        },
        GoldenVector {
            name: "multi-digit keys",
            tables: &["t"],
            columns: &["c2", "c3", "c4", "c5", "c6", "c7", "c8", "c9", "c10", "c11"],
            values: &[],
            template: "SELECT %11$I, %1$I",
            expected: "SELECT \"c11\", \"t\"",
        },
        GoldenVector {
            name: "missing value left verbatim",
            tables: &[],
            columns: &[],
            values: &[],
            template: "SELECT $7",
            expected: "SELECT $7",
        },
        GoldenVector {
            name: "dollar signs that are not placeholders",
            tables: &["t"],
            columns: &[],
            values: &["1"],
            template: "SELECT '$x', $$body$$ FROM %1$I LIMIT $1",
            expected: "SELECT '$x', $$body$$ FROM \"t\" LIMIT 1",
        },
    ]
}

/// Resolve a vector with a throwaway key store.
pub fn materialize_vector(vector: &GoldenVector) -> String {
    let keys = LocalKeyStore::open(MemoryVault::new(), "vectors", VaultConfig::insecure_fast())
        .expect("open key store");
    let key_id = keys.generate_key(KEY_BITS).expect("generate key");

    let mut wal = Wal::new();
    wal.intern_identifiers(vector.tables, vector.columns)
        .expect("intern identifiers");

    let mut registry = ValueRegistry::new();
    for (i, text) in vector.values.iter().enumerate() {
        let content_id = ContentId::from(format!("value-{i}"));
        registry.insert(
            content_id.clone(),
            keys.encrypt_metadata(&key_id, text).expect("seal value"),
        );
        wal.intern_value(content_id).expect("intern value");
    }

    materialize(vector.template, &wal, &registry, &key_id, &keys).expect("materialize")
}

/// Names of the vectors whose output differs from the expected statement.
pub fn verify_all_vectors() -> Vec<&'static str> {
    all_vectors()
        .iter()
        .filter(|v| materialize_vector(v) != v.expected)
        .map(|v| v.name)
        .collect()
}
