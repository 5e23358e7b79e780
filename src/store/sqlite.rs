//! SQLite-backed metadata store.
//!
//! # Design
//!
//! - One row holding the JSON document and its resource version
//! - Versioned schema: a store written by an incompatible build is rejected
//!   rather than silently cleared, since it holds user data
//! - The resource version check and the write happen in one transaction

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{MetadataStore, StoreError, StoreResult};
use crate::metadata::Metadata;

/// Current store schema version. Bump this when the table layout changes.
const STORE_SCHEMA_VERSION: i32 = 1;

/// Metadata store in a SQLite database file.
#[derive(Debug)]
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteMetadataStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init()?;
        tracing::debug!(path = %path.display(), "opened sqlite metadata store");
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                resource_version INTEGER NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored_version {
            Some(v) if v == STORE_SCHEMA_VERSION => Ok(()),
            Some(v) => Err(StoreError::Unavailable(format!(
                "store schema version {} is not supported (expected {})",
                v, STORE_SCHEMA_VERSION
            ))),
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?)",
                    params![STORE_SCHEMA_VERSION.to_string()],
                )?;
                Ok(())
            }
        }
    }

    fn read(conn: &Connection) -> StoreResult<(Metadata, u64)> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT resource_version, document FROM metadata WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((version, document)) => Ok((serde_json::from_str(&document)?, version as u64)),
            None => Ok((Metadata::default(), 0)),
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn fetch(&self) -> StoreResult<(Metadata, u64)> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Self::read(&conn)
    }

    async fn store(&self, metadata: &Metadata, expected_version: u64) -> StoreResult<u64> {
        let document = serde_json::to_string(metadata)?;
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual: u64 = tx
            .query_row("SELECT resource_version FROM metadata WHERE id = 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .map(|v| v as u64)
            .unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual,
            });
        }

        let next = actual + 1;
        tx.execute(
            "INSERT OR REPLACE INTO metadata (id, resource_version, document) VALUES (1, ?, ?)",
            params![next as i64, document],
        )?;
        tx.commit()?;
        Ok(next)
    }

    async fn resource_version(&self) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let version: Option<i64> = conn
            .query_row("SELECT resource_version FROM metadata WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(version.map(|v| v as u64).unwrap_or(0))
    }
}
