//! SQLite implementation of the Store trait.
//!
//! Stands in for the collaboration backend in single-node deployments and
//! tests. It uses rusqlite with bundled SQLite, wrapped in async via
//! tokio::spawn_blocking. Records are stored as JSON columns.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use sealpipe_core::{KeyId, Manifest, SpaceHandle, UserId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::records::{ConceptRecord, DataSpace, MetadataRecord, Secret, TransformerNode, Widget};
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

fn ensure_space(conn: &Connection, handle: &str) -> Result<()> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM spaces WHERE handle = ?1", params![handle], |row| {
            row.get(0)
        })
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(format!("space {handle}"))),
    }
}

/// Select `(id, json)` pairs for a space, ordered by id.
fn select_pairs(conn: &Connection, sql: &str, handle: &str) -> Result<Vec<(String, String)>> {
    ensure_space(conn, handle)?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![handle], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_space(&self, handle: &SpaceHandle) -> Result<DataSpace> {
        let handle = handle.clone();
        self.run(move |conn| {
            let key: Option<String> = conn
                .query_row(
                    "SELECT active_key_id FROM spaces WHERE handle = ?1",
                    params![handle.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let key = key.ok_or_else(|| StoreError::NotFound(format!("space {handle}")))?;
            Ok(DataSpace {
                handle,
                active_key_id: KeyId::from(key),
            })
        })
        .await
    }

    async fn create_space(&self, space: &DataSpace, manifest: &Manifest) -> Result<()> {
        let space = space.clone();
        let manifest = to_json(manifest)?;
        self.run(move |conn| {
            if ensure_space(conn, space.handle.as_str()).is_ok() {
                return Err(StoreError::AlreadyExists(format!("space {}", space.handle)));
            }
            conn.execute(
                "INSERT INTO spaces (handle, active_key_id, manifest) VALUES (?1, ?2, ?3)",
                params![space.handle.as_str(), space.active_key_id.as_str(), manifest],
            )?;
            Ok(())
        })
        .await
    }

    async fn fetch_manifest(&self, handle: &SpaceHandle) -> Result<Manifest> {
        let handle = handle.clone();
        self.run(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT manifest FROM spaces WHERE handle = ?1",
                    params![handle.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let json = json.ok_or_else(|| StoreError::NotFound(format!("space {handle}")))?;
            from_json(&json)
        })
        .await
    }

    async fn put_manifest(&self, handle: &SpaceHandle, manifest: &Manifest) -> Result<()> {
        let handle = handle.clone();
        let manifest = to_json(manifest)?;
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE spaces SET manifest = ?2 WHERE handle = ?1",
                params![handle.as_str(), manifest],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("space {handle}")));
            }
            Ok(())
        })
        .await
    }

    async fn publish_active_key(&self, handle: &SpaceHandle, key_id: &KeyId) -> Result<()> {
        let handle = handle.clone();
        let key_id = key_id.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE spaces SET active_key_id = ?2 WHERE handle = ?1",
                params![handle.as_str(), key_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("space {handle}")));
            }
            Ok(())
        })
        .await
    }

    async fn list_metadata(&self, handle: &SpaceHandle) -> Result<Vec<MetadataRecord>> {
        let handle = handle.clone();
        self.run(move |conn| {
            select_pairs(
                conn,
                "SELECT content_id, sealed FROM metadata WHERE handle = ?1 ORDER BY content_id",
                handle.as_str(),
            )?
            .into_iter()
            .map(|(content_id, sealed)| {
                Ok(MetadataRecord {
                    content_id: content_id.into(),
                    sealed: from_json(&sealed)?,
                })
            })
            .collect()
        })
        .await
    }

    async fn put_metadata(&self, handle: &SpaceHandle, record: &MetadataRecord) -> Result<()> {
        let handle = handle.clone();
        let content_id = record.content_id.clone();
        let sealed = to_json(&record.sealed)?;
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            conn.execute(
                "INSERT OR REPLACE INTO metadata (handle, content_id, sealed) VALUES (?1, ?2, ?3)",
                params![handle.as_str(), content_id.as_str(), sealed],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_concepts(&self, handle: &SpaceHandle) -> Result<Vec<ConceptRecord>> {
        let handle = handle.clone();
        self.run(move |conn| {
            select_pairs(
                conn,
                "SELECT id, sealed FROM concepts WHERE handle = ?1 ORDER BY id",
                handle.as_str(),
            )?
            .into_iter()
            .map(|(id, sealed)| {
                Ok(ConceptRecord {
                    id,
                    sealed: from_json(&sealed)?,
                })
            })
            .collect()
        })
        .await
    }

    async fn put_concept(&self, handle: &SpaceHandle, concept: &ConceptRecord) -> Result<()> {
        let handle = handle.clone();
        let id = concept.id.clone();
        let sealed = to_json(&concept.sealed)?;
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            conn.execute(
                "INSERT OR REPLACE INTO concepts (handle, id, sealed) VALUES (?1, ?2, ?3)",
                params![handle.as_str(), id, sealed],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_widgets(&self, handle: &SpaceHandle) -> Result<Vec<Widget>> {
        let handle = handle.clone();
        self.run(move |conn| {
            select_pairs(
                conn,
                "SELECT id, record FROM widgets WHERE handle = ?1 ORDER BY id",
                handle.as_str(),
            )?
            .into_iter()
            .map(|(_, record)| from_json(&record))
            .collect()
        })
        .await
    }

    async fn put_widget(&self, handle: &SpaceHandle, widget: &Widget) -> Result<()> {
        let handle = handle.clone();
        let id = widget.id.clone();
        let record = to_json(widget)?;
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            conn.execute(
                "INSERT OR REPLACE INTO widgets (handle, id, record) VALUES (?1, ?2, ?3)",
                params![handle.as_str(), id, record],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_transformers(&self, handle: &SpaceHandle) -> Result<Vec<TransformerNode>> {
        let handle = handle.clone();
        self.run(move |conn| {
            select_pairs(
                conn,
                "SELECT id, wal FROM transformers WHERE handle = ?1 ORDER BY id",
                handle.as_str(),
            )?
            .into_iter()
            .map(|(id, wal)| {
                Ok(TransformerNode {
                    id,
                    wal: from_json(&wal)?,
                })
            })
            .collect()
        })
        .await
    }

    async fn get_transformer(
        &self,
        handle: &SpaceHandle,
        id: &str,
    ) -> Result<Option<TransformerNode>> {
        let handle = handle.clone();
        let id = id.to_string();
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            let wal: Option<String> = conn
                .query_row(
                    "SELECT wal FROM transformers WHERE handle = ?1 AND id = ?2",
                    params![handle.as_str(), id],
                    |row| row.get(0),
                )
                .optional()?;
            wal.map(|wal| {
                Ok(TransformerNode {
                    id,
                    wal: from_json(&wal)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn put_transformer(&self, handle: &SpaceHandle, node: &TransformerNode) -> Result<()> {
        let handle = handle.clone();
        let id = node.id.clone();
        let wal = to_json(&node.wal)?;
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            conn.execute(
                "INSERT OR REPLACE INTO transformers (handle, id, wal) VALUES (?1, ?2, ?3)",
                params![handle.as_str(), id, wal],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_secret(&self, handle: &SpaceHandle, secret: &Secret) -> Result<()> {
        let handle = handle.clone();
        let secret = secret.clone();
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            // REPLACE deletes the old row, so a re-share gets a fresh rowid.
            conn.execute(
                "INSERT OR REPLACE INTO secrets
                    (handle, key_id, owner, receiver, ciphertext, message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    handle.as_str(),
                    secret.key_id.as_str(),
                    secret.owner.as_str(),
                    secret.receiver.as_str(),
                    secret.ciphertext,
                    secret.message_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn secrets_for(&self, handle: &SpaceHandle, receiver: &UserId) -> Result<Vec<Secret>> {
        let handle = handle.clone();
        let receiver = receiver.clone();
        self.run(move |conn| {
            ensure_space(conn, handle.as_str())?;
            let mut stmt = conn.prepare(
                "SELECT key_id, owner, ciphertext, message_id FROM secrets
                 WHERE handle = ?1 AND receiver = ?2 ORDER BY rowid",
            )?;
            let secrets = stmt
                .query_map(params![handle.as_str(), receiver.as_str()], |row| {
                    Ok(Secret {
                        key_id: KeyId::from(row.get::<_, String>(0)?),
                        owner: UserId::from(row.get::<_, String>(1)?),
                        receiver: receiver.clone(),
                        ciphertext: row.get(2)?,
                        message_id: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(secrets)
        })
        .await
    }
}
