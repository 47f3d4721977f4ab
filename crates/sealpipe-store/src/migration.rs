//! SQLite schema.
//!
//! The schema version lives in `PRAGMA user_version`. Step `n` of
//! [`STEPS`] takes the schema from version `n` to `n + 1`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Schema steps, oldest first.
const STEPS: &[&str] = &[SCHEMA_V1];

/// Version a fully migrated database reports.
pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

const SCHEMA_V1: &str = r#"
    -- Data spaces and their signed manifests
    CREATE TABLE spaces (
        handle TEXT PRIMARY KEY,
        active_key_id TEXT NOT NULL,
        manifest TEXT NOT NULL            -- JSON {users, signature}
    );

    -- Encrypted column metadata / value registry
    CREATE TABLE metadata (
        handle TEXT NOT NULL REFERENCES spaces(handle),
        content_id TEXT NOT NULL,
        sealed TEXT NOT NULL,             -- JSON Sealed envelope
        PRIMARY KEY (handle, content_id)
    );

    -- Concept taxonomy, one row per concept
    CREATE TABLE concepts (
        handle TEXT NOT NULL REFERENCES spaces(handle),
        id TEXT NOT NULL,
        sealed TEXT NOT NULL,
        PRIMARY KEY (handle, id)
    );

    -- Published widgets
    CREATE TABLE widgets (
        handle TEXT NOT NULL REFERENCES spaces(handle),
        id TEXT NOT NULL,
        record TEXT NOT NULL,             -- JSON Widget
        PRIMARY KEY (handle, id)
    );

    -- Transformer nodes, replaced wholesale
    CREATE TABLE transformers (
        handle TEXT NOT NULL REFERENCES spaces(handle),
        id TEXT NOT NULL,
        wal TEXT NOT NULL,                -- JSON WAL
        PRIMARY KEY (handle, id)
    );

    -- Store-and-forward key shares
    CREATE TABLE secrets (
        handle TEXT NOT NULL REFERENCES spaces(handle),
        key_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        receiver TEXT NOT NULL,
        ciphertext BLOB NOT NULL,
        message_id TEXT,
        PRIMARY KEY (handle, key_id, owner, receiver)
    );

    CREATE INDEX idx_secrets_receiver ON secrets(handle, receiver);
"#;

fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {found}, newer than supported {CURRENT_VERSION}"
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &STEPS[found as usize..] {
        tx.execute_batch(step)?;
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;

    tracing::debug!(from = found, to = CURRENT_VERSION, "migrated store schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = fresh();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        for table in ["spaces", "metadata", "concepts", "widgets", "transformers", "secrets"] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[test]
    fn test_reopen_is_a_no_op() {
        let mut conn = fresh();
        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = fresh();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
