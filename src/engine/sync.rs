//! Catalog sync: pick up changes another instance wrote to the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{MetadataEngine, MetadataResult};
use crate::cache::{BuildReason, CacheInvalidations};

impl MetadataEngine {
    /// Rebuild from the store if its resource version moved past the one
    /// the current cache was built from. Returns whether a rebuild ran.
    ///
    /// The rebuild is a [`BuildReason::CatalogSync`]: it never installs
    /// anything in the databases.
    pub async fn sync_catalog(&self) -> MetadataResult<bool> {
        let stored = self.store.resource_version().await?;
        let current = self.snapshot().resource_version();
        if stored == current {
            return Ok(false);
        }

        tracing::info!(stored, current, "metadata changed in the store, syncing");
        let invalidations = CacheInvalidations {
            metadata: true,
            ..CacheInvalidations::none()
        };
        self.build_schema_cache(|_| Ok(()), invalidations, BuildReason::CatalogSync)
            .await?;
        Ok(true)
    }
}

/// Poll the store every `period` and sync when it changed. Errors are logged
/// and the poller keeps going.
pub fn spawn_catalog_sync(engine: Arc<MetadataEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the cache was just built.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match engine.sync_catalog().await {
                Ok(true) => tracing::debug!("catalog sync rebuilt the schema cache"),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, code = %e.code, "catalog sync failed"),
            }
        }
    })
}
