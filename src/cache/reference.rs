//! The published schema cache and its update protocol.
//!
//! ```text
//!   readers ──snapshot()──▶ RwLock<Arc<CacheSnapshot>>   (clone the pointer, never block on a build)
//!                                   ▲
//!   writers ──lock──▶ Mutex<BuildArtifacts> ──action──▶ swap (cache, version + 1) ──▶ gauge
//! ```
//!
//! Writers are serialised by the mutex; an action runs with the lock held and
//! its result is published in one pointer swap. If the action fails nothing is
//! published and the previous snapshot stays current.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::Mutex;

use super::build::BuildArtifacts;
use super::types::SchemaCache;
use crate::config::AppContext;
use crate::inconsistency::{ledger_changed, new_inconsistencies};
use crate::metadata::Metadata;

/// Counts swaps of the published cache. Starts at zero for the initial cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SchemaCacheVer(pub u64);

impl SchemaCacheVer {
    pub fn next(self) -> Self {
        SchemaCacheVer(self.0 + 1)
    }
}

impl fmt::Display for SchemaCacheVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A published cache together with the document it was built from.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub cache: Arc<SchemaCache>,
    pub metadata: Arc<Metadata>,
    pub version: SchemaCacheVer,
}

impl CacheSnapshot {
    pub fn resource_version(&self) -> u64 {
        self.cache.metadata_resource_version
    }
}

/// What an update action hands back to be published.
#[derive(Debug)]
pub struct Rebuilt<T> {
    pub value: T,
    pub metadata: Metadata,
    pub cache: SchemaCache,
    pub artifacts: BuildArtifacts,
}

/// Receives the metadata resource version after every swap.
pub trait MetadataVersionGauge: Send + Sync {
    fn set_version(&self, resource_version: u64) -> Result<(), String>;
}

/// Shared handle to the current schema cache.
pub struct SchemaCacheRef {
    writer: Mutex<BuildArtifacts>,
    current: RwLock<Arc<CacheSnapshot>>,
    context: RwLock<Arc<AppContext>>,
    gauge: Option<Arc<dyn MetadataVersionGauge>>,
}

impl SchemaCacheRef {
    pub fn new(metadata: Metadata, cache: SchemaCache, artifacts: BuildArtifacts, context: AppContext) -> Self {
        Self {
            writer: Mutex::new(artifacts),
            current: RwLock::new(Arc::new(CacheSnapshot {
                cache: Arc::new(cache),
                metadata: Arc::new(metadata),
                version: SchemaCacheVer::default(),
            })),
            context: RwLock::new(Arc::new(context)),
            gauge: None,
        }
    }

    pub fn with_gauge(mut self, gauge: Arc<dyn MetadataVersionGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// The current snapshot. Never waits for a running rebuild.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cache(&self) -> Arc<SchemaCache> {
        self.snapshot().cache.clone()
    }

    pub fn version(&self) -> SchemaCacheVer {
        self.snapshot().version
    }

    pub fn app_context(&self) -> Arc<AppContext> {
        self.context
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the application context. Takes effect for the next build.
    pub async fn set_app_context(&self, context: AppContext) {
        let _writer = self.writer.lock().await;
        *self.context.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(context);
    }

    /// Run `action` with the writer lock held and publish what it rebuilt.
    ///
    /// The action receives the current snapshot and a copy of the build
    /// artifacts. On `Err` the lock is released and nothing changes.
    pub async fn with_schema_cache_update<T, E, F, Fut>(&self, action: F) -> Result<T, E>
    where
        F: FnOnce(Arc<CacheSnapshot>, BuildArtifacts) -> Fut,
        Fut: Future<Output = Result<Rebuilt<T>, E>>,
    {
        let mut artifacts = self.writer.lock().await;
        let previous = self.snapshot();

        let rebuilt = action(previous.clone(), artifacts.clone()).await?;

        *artifacts = rebuilt.artifacts;
        let version = previous.version.next();
        let snapshot = Arc::new(CacheSnapshot {
            cache: Arc::new(rebuilt.cache),
            metadata: Arc::new(rebuilt.metadata),
            version,
        });
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();

        tracing::info!(
            version = %version,
            resource_version = snapshot.resource_version(),
            "schema cache swapped"
        );
        self.report_version(snapshot.resource_version());
        log_inconsistency_change(&previous.cache, &snapshot.cache);

        Ok(rebuilt.value)
    }

    fn report_version(&self, resource_version: u64) {
        if let Some(gauge) = &self.gauge {
            if let Err(e) = gauge.set_version(resource_version) {
                tracing::warn!(error = %e, "failed to set the metadata resource version gauge");
            }
        }
    }
}

impl fmt::Debug for SchemaCacheRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCacheRef")
            .field("version", &self.version())
            .field("gauge", &self.gauge.is_some())
            .finish_non_exhaustive()
    }
}

/// Log only when the set of inconsistencies changed.
fn log_inconsistency_change(old: &SchemaCache, new: &SchemaCache) {
    let (old, new) = (&old.inconsistent_objects, &new.inconsistent_objects);
    if !old.is_empty() && new.is_empty() {
        tracing::info!("all inconsistent metadata has been resolved");
        return;
    }
    if !ledger_changed(old, new) {
        return;
    }
    let added = new_inconsistencies(old, new);
    if added.is_empty() {
        tracing::info!(remaining = new.len(), "inconsistent metadata changed");
        return;
    }
    for entry in added {
        let objects: Vec<String> = entry.object_ids().iter().map(|id| id.to_string()).collect();
        tracing::warn!(objects = ?objects, reason = %entry.reason(), "inconsistent metadata");
    }
}
