//! The metadata engine: the one place that changes the metadata document and
//! republishes the schema cache.
//!
//! # Flow
//!
//! ```text
//! request ─▶ modifier(&mut Metadata)        on a copy of the current document
//!         ─▶ build_schema_cache             full rebuild, failures to the ledger
//!         ─▶ check                          diff the ledger against the previous one
//!         ─▶ store(document, version)       only if the document changed
//!         ─▶ swap                           readers see the new snapshot
//! ```
//!
//! A check that fails aborts before the store write and before the swap, so
//! the document, the cache and its version all stay as they were.

mod error;
mod sync;

pub use error::{ErrorClass, ErrorCode, MetadataError, MetadataResult};
pub use sync::spawn_catalog_sync;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendRegistry, DataConnectorAgentProvider, RemoteSchemaProvider};
use crate::cache::{
    build_schema_cache, BuildArtifacts, BuildContext, BuildInputs, BuildOutput, BuildReason,
    CacheInvalidations, CacheSnapshot, MetadataVersionGauge, Rebuilt, SchemaCache, SchemaCacheRef,
};
use crate::config::AppContext;
use crate::inconsistency::{inconsistent_ids, new_inconsistencies, reasons_for, InconsistencyReport};
use crate::metadata::names::*;
use crate::metadata::Metadata;
use crate::schema::MetadataObjId;
use crate::store::MetadataStore;

// ============================================================================
// Construction
// ============================================================================

/// Collaborators of an engine, and the initial build.
pub struct EngineBuilder {
    store: Arc<dyn MetadataStore>,
    context: BuildContext,
    gauge: Option<Arc<dyn MetadataVersionGauge>>,
}

impl EngineBuilder {
    pub fn with_gauge(mut self, gauge: Arc<dyn MetadataVersionGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Fetch the stored document and run the first build.
    pub async fn initialise(self) -> MetadataResult<MetadataEngine> {
        let (metadata, resource_version) = self.store.fetch().await?;
        let reason = BuildReason::update_all();
        let BuildOutput { cache, artifacts } = build_schema_cache(
            BuildInputs {
                metadata: &metadata,
                resource_version,
                reason: &reason,
                invalidations: &CacheInvalidations::none(),
                previous: &BuildArtifacts::default(),
            },
            &self.context,
        )
        .await;

        tracing::info!(
            resource_version,
            inconsistent = cache.inconsistent_objects.len(),
            instance = %self.context.app.instance_id,
            "initial schema cache built"
        );

        let mut cache_ref = SchemaCacheRef::new(metadata, cache, artifacts, self.context.app.clone());
        if let Some(gauge) = self.gauge {
            if let Err(e) = gauge.set_version(resource_version) {
                tracing::warn!(error = %e, "failed to set the metadata resource version gauge");
            }
            cache_ref = cache_ref.with_gauge(gauge);
        }

        Ok(MetadataEngine {
            store: self.store,
            cache_ref: Arc::new(cache_ref),
            backends: self.context.backends,
            remote_schemas: self.context.remote_schemas,
            agents: self.context.agents,
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Owns the metadata store and the published schema cache.
pub struct MetadataEngine {
    store: Arc<dyn MetadataStore>,
    cache_ref: Arc<SchemaCacheRef>,
    backends: BackendRegistry,
    remote_schemas: Arc<dyn RemoteSchemaProvider>,
    agents: Arc<dyn DataConnectorAgentProvider>,
}

/// What a rebuild must leave intact for its result to be published.
#[derive(Debug, Clone, Copy)]
enum Check<'a> {
    /// Publish whatever the build produced.
    None,
    /// Reject if `target` became inconsistent, or failing that, if anything did.
    Target(&'a MetadataObjId),
    /// Reject if anything became inconsistent, blaming the request.
    Consistent,
    /// Reject if anything became inconsistent; the caller expected no fallout.
    NoNewInconsistencies,
}

impl Check<'_> {
    fn verify(self, old: &SchemaCache, new: &SchemaCache) -> MetadataResult<()> {
        let fresh = new_inconsistencies(&old.inconsistent_objects, &new.inconsistent_objects);
        match self {
            Check::None => Ok(()),
            Check::Target(target) => {
                if !inconsistent_ids(&old.inconsistent_objects).contains(target) {
                    let reasons = reasons_for(&new.inconsistent_objects, target);
                    if !reasons.is_empty() {
                        return Err(MetadataError::targeted(&reasons));
                    }
                }
                if fresh.is_empty() {
                    Ok(())
                } else {
                    Err(MetadataError::collateral(&fresh))
                }
            }
            Check::Consistent => {
                if fresh.is_empty() {
                    Ok(())
                } else {
                    Err(MetadataError::collateral(&fresh))
                }
            }
            Check::NoNewInconsistencies => {
                if fresh.is_empty() {
                    Ok(())
                } else {
                    Err(MetadataError::newly_inconsistent(&fresh))
                }
            }
        }
    }
}

impl MetadataEngine {
    pub fn builder(store: Arc<dyn MetadataStore>, context: BuildContext) -> EngineBuilder {
        EngineBuilder {
            store,
            context,
            gauge: None,
        }
    }

    /// The published cache handle, for readers.
    pub fn cache_ref(&self) -> Arc<SchemaCacheRef> {
        self.cache_ref.clone()
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.cache_ref.snapshot()
    }

    pub fn cache(&self) -> Arc<SchemaCache> {
        self.cache_ref.cache()
    }

    pub fn metadata(&self) -> Arc<Metadata> {
        self.snapshot().metadata.clone()
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn inconsistency_report(&self) -> InconsistencyReport {
        InconsistencyReport::new(&self.cache().inconsistent_objects)
    }

    /// Apply `modifier` to the document and rebuild. The result is published
    /// however many objects end up inconsistent.
    pub async fn build_schema_cache<F>(
        &self,
        modifier: F,
        invalidations: CacheInvalidations,
        reason: BuildReason,
    ) -> MetadataResult<()>
    where
        F: FnOnce(&mut Metadata) -> MetadataResult<()>,
    {
        self.update(|metadata, _| modifier(metadata), invalidations, reason, Check::None)
            .await
    }

    /// Apply `modifier` to the document and rebuild, failing if `target`
    /// or any other object became inconsistent. A failure publishes nothing.
    pub async fn build_schema_cache_for<F>(
        &self,
        target: &MetadataObjId,
        modifier: F,
        reason: BuildReason,
    ) -> MetadataResult<()>
    where
        F: FnOnce(&mut Metadata) -> MetadataResult<()>,
    {
        self.update(
            |metadata, _| modifier(metadata),
            CacheInvalidations::none(),
            reason,
            Check::Target(target),
        )
        .await
    }

    /// Apply `modifier` and rebuild, failing if any object became
    /// inconsistent. A failure publishes nothing.
    pub async fn build_schema_cache_checked<F>(&self, modifier: F, reason: BuildReason) -> MetadataResult<()>
    where
        F: FnOnce(&mut Metadata) -> MetadataResult<()>,
    {
        self.update(
            |metadata, _| modifier(metadata),
            CacheInvalidations::none(),
            reason,
            Check::Consistent,
        )
        .await
    }

    /// Apply `modifier` and rebuild, treating any new inconsistency as a
    /// fatal error. Used by drops, which must not strand other objects.
    ///
    /// The check covers exactly one rebuild. A multi-step change is expressed
    /// as one modifier making every document edit, so no intermediate
    /// document is ever built or published.
    pub async fn with_new_inconsistent_objs_check<F>(
        &self,
        modifier: F,
        reason: BuildReason,
    ) -> MetadataResult<()>
    where
        F: FnOnce(&mut Metadata) -> MetadataResult<()>,
    {
        self.with_new_inconsistent_objs_check_on(|metadata, _| modifier(metadata), reason)
            .await
    }

    /// As [`with_new_inconsistent_objs_check`](Self::with_new_inconsistent_objs_check),
    /// with the modifier also given the schema cache the rebuild starts from.
    /// It runs under the writer lock, so decisions taken from that cache
    /// cannot be invalidated by a concurrent update.
    pub async fn with_new_inconsistent_objs_check_on<F>(
        &self,
        modifier: F,
        reason: BuildReason,
    ) -> MetadataResult<()>
    where
        F: FnOnce(&mut Metadata, &SchemaCache) -> MetadataResult<()>,
    {
        self.update(
            modifier,
            CacheInvalidations::none(),
            reason,
            Check::NoNewInconsistencies,
        )
        .await
    }

    /// Re-read the document from the store and rebuild, refetching whatever
    /// `reload` asks for.
    pub async fn reload_metadata(&self, reload: &ReloadMetadata) -> MetadataResult<InconsistencyReport> {
        let metadata = self.metadata();
        let invalidations = reload.invalidations(&metadata);
        let reason = BuildReason::CatalogUpdate(Some(reload.recreate_event_triggers.select(
            metadata.sources.iter().map(|s| &s.name),
        )));

        tracing::info!(
            sources = invalidations.sources.len(),
            remote_schemas = invalidations.remote_schemas.len(),
            data_connectors = invalidations.data_connectors.len(),
            "reloading metadata"
        );
        self.build_schema_cache(|_| Ok(()), invalidations, reason).await?;
        Ok(self.inconsistency_report())
    }

    /// Replace the application context and rebuild against it.
    pub async fn set_app_context(&self, context: AppContext) -> MetadataResult<()> {
        self.cache_ref.set_app_context(context).await;
        self.build_schema_cache(
            |_| Ok(()),
            CacheInvalidations::none(),
            BuildReason::CatalogUpdate(Some(BTreeSet::new())),
        )
        .await
    }

    fn build_context(&self) -> BuildContext {
        BuildContext {
            app: (*self.cache_ref.app_context()).clone(),
            backends: self.backends.clone(),
            remote_schemas: self.remote_schemas.clone(),
            agents: self.agents.clone(),
        }
    }

    async fn update<F>(
        &self,
        modifier: F,
        invalidations: CacheInvalidations,
        reason: BuildReason,
        check: Check<'_>,
    ) -> MetadataResult<()>
    where
        F: FnOnce(&mut Metadata, &SchemaCache) -> MetadataResult<()>,
    {
        self.cache_ref
            .with_schema_cache_update(|previous, artifacts| {
                self.rebuild(previous, artifacts, modifier, invalidations, reason, check)
            })
            .await
    }

    async fn rebuild<F>(
        &self,
        previous: Arc<CacheSnapshot>,
        previous_artifacts: BuildArtifacts,
        modifier: F,
        invalidations: CacheInvalidations,
        reason: BuildReason,
        check: Check<'_>,
    ) -> MetadataResult<Rebuilt<()>>
    where
        F: FnOnce(&mut Metadata, &SchemaCache) -> MetadataResult<()>,
    {
        let (base, expected) = if invalidations.metadata {
            self.store.fetch().await?
        } else {
            ((*previous.metadata).clone(), previous.resource_version())
        };

        let mut metadata = base.clone();
        modifier(&mut metadata, previous.cache.as_ref())?;
        let dirty = metadata != base;

        let ctx = self.build_context();
        let BuildOutput { mut cache, artifacts } = build_schema_cache(
            BuildInputs {
                metadata: &metadata,
                resource_version: if dirty { expected + 1 } else { expected },
                reason: &reason,
                invalidations: &invalidations,
                previous: &previous_artifacts,
            },
            &ctx,
        )
        .await;

        if let Err(e) = check.verify(&previous.cache, &cache) {
            tracing::debug!(code = %e.code, error = %e, "rebuild rejected, keeping the current schema cache");
            return Err(e);
        }

        if dirty {
            cache.metadata_resource_version = self.store.store(&metadata, expected).await?;
        }

        Ok(Rebuilt {
            value: (),
            metadata,
            cache,
            artifacts,
        })
    }
}

impl std::fmt::Debug for MetadataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataEngine")
            .field("cache_ref", &self.cache_ref)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reload options
// ============================================================================

/// `true` for everything, `false` for nothing, or an explicit list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReloadSpec<N: Ord> {
    All(bool),
    Only(BTreeSet<N>),
}

impl<N: Ord> Default for ReloadSpec<N> {
    fn default() -> Self {
        ReloadSpec::All(false)
    }
}

impl<N: Ord + Clone> ReloadSpec<N> {
    /// The names selected out of `known`. Listed names need not be known.
    pub fn select<'a>(&self, known: impl IntoIterator<Item = &'a N>) -> BTreeSet<N>
    where
        N: 'a,
    {
        match self {
            ReloadSpec::All(true) => known.into_iter().cloned().collect(),
            ReloadSpec::All(false) => BTreeSet::new(),
            ReloadSpec::Only(names) => names.clone(),
        }
    }
}

/// Arguments of `reload_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadMetadata {
    pub reload_remote_schemas: ReloadSpec<RemoteSchemaName>,
    pub reload_sources: ReloadSpec<SourceName>,
    pub recreate_event_triggers: ReloadSpec<SourceName>,
    pub reload_data_connectors: ReloadSpec<DataConnectorName>,
}

impl ReloadMetadata {
    /// Reload everything.
    pub fn all() -> Self {
        Self {
            reload_remote_schemas: ReloadSpec::All(true),
            reload_sources: ReloadSpec::All(true),
            recreate_event_triggers: ReloadSpec::All(false),
            reload_data_connectors: ReloadSpec::All(true),
        }
    }

    fn invalidations(&self, metadata: &Metadata) -> CacheInvalidations {
        CacheInvalidations {
            metadata: true,
            remote_schemas: self
                .reload_remote_schemas
                .select(metadata.remote_schemas.iter().map(|r| &r.name)),
            sources: self
                .reload_sources
                .select(metadata.sources.iter().map(|s| &s.name)),
            data_connectors: self
                .reload_data_connectors
                .select(metadata.backend_configs.dataconnector.keys()),
        }
    }
}
