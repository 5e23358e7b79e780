//! Persistence of the metadata document.
//!
//! The store holds one document and a resource version that increases with
//! every successful write. Writes are optimistic: a write names the version it
//! was based on and fails with [`StoreError::Conflict`] if another writer got
//! there first.

mod sqlite;

pub use sqlite::SqliteMetadataStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::metadata::Metadata;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata was modified concurrently: expected resource version {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("metadata store is unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Where the metadata document lives.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// The stored document and its resource version.
    async fn fetch(&self) -> StoreResult<(Metadata, u64)>;

    /// Replace the document if the stored version is still `expected_version`.
    /// Returns the new resource version.
    async fn store(&self, metadata: &Metadata, expected_version: u64) -> StoreResult<u64>;

    /// The current resource version, without reading the document.
    async fn resource_version(&self) -> StoreResult<u64> {
        Ok(self.fetch().await?.1)
    }
}

/// A store that keeps the document in memory. Starts empty at version 0.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    state: Mutex<(Metadata, u64)>,
    unavailable: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(metadata: Metadata) -> Self {
        Self {
            state: Mutex::new((metadata, 0)),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every call fail, to simulate losing the database.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn fetch(&self) -> StoreResult<(Metadata, u64)> {
        self.check_available()?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.clone())
    }

    async fn store(&self, metadata: &Metadata, expected_version: u64) -> StoreResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.1 != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: state.1,
            });
        }
        state.0 = metadata.clone();
        state.1 += 1;
        Ok(state.1)
    }

    async fn resource_version(&self) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).1)
    }
}
