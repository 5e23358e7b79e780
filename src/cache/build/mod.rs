//! The schema cache build.
//!
//! A build takes a metadata document and produces a [`SchemaCache`]. Objects
//! that fail to resolve are written to the inconsistency ledger and left out;
//! the build itself never fails.
//!
//! # Stages
//!
//! ```text
//! data connector agents ─┐
//!                        ▼
//! sources (config + introspection, concurrently)
//!   └─ tables ─ functions ─ computed fields ─ relationships
//!        ─ logical models ─ native queries ─ permissions ─ event triggers
//! remote schemas ─ remote schema permissions
//! root fields (conflicts quarantined)
//! query collections ─ allow list ─ REST endpoints
//! OpenTelemetry
//! prune: drop owners of dependencies that did not resolve, to a fixpoint
//! ```
//!
//! Each stage reads what earlier stages put into the partial cache, records
//! an inconsistency and skips when something it needs is absent, calls the
//! backend adapter, and records its dependencies.

mod collections;
mod logical;
mod permissions;
mod prune;
mod relationships;
mod remote;
mod sources;
mod tables;
mod triggers;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use super::invalidation::{BuildReason, CacheInvalidations};
use super::types::{SchemaCache, SourceInfo};
use crate::backend::{
    AgentInfo, BackendMetadata, BackendRegistry, DataConnectorAgentProvider, DatabaseMetadata,
    RemoteIntrospection, RemoteSchemaProvider, ResolvedSourceConfig,
};
use crate::config::AppContext;
use crate::inconsistency::{InconsistencyLedger, ResolveError, ResolveResult};
use crate::metadata::names::*;
use crate::metadata::Metadata;
use crate::schema::{
    DependencyGraph, DependencyReason, LogicalModelMetadataObjId, MetadataDependency,
    MetadataObjId, MetadataObject, SchemaDependency, SchemaObjId, SourceMetadataObjId,
    TableMetadataObjId,
};

/// The collaborators a build calls out to.
#[derive(Clone)]
pub struct BuildContext {
    pub app: AppContext,
    pub backends: BackendRegistry,
    pub remote_schemas: Arc<dyn RemoteSchemaProvider>,
    pub agents: Arc<dyn DataConnectorAgentProvider>,
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("app", &self.app)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

/// A fetched value and the fingerprint of the definition it was fetched for.
#[derive(Debug, Clone)]
pub struct Fingerprinted<T> {
    pub fingerprint: String,
    pub value: T,
}

/// Results of expensive external calls, kept from one build to the next.
#[derive(Debug, Clone, Default)]
pub struct BuildArtifacts {
    pub source_configs: HashMap<SourceName, Fingerprinted<ResolvedSourceConfig>>,
    pub databases: HashMap<SourceName, Fingerprinted<DatabaseMetadata>>,
    pub remote_schemas: HashMap<RemoteSchemaName, Fingerprinted<RemoteIntrospection>>,
    pub agents: HashMap<DataConnectorName, Fingerprinted<AgentInfo>>,
}

/// Everything one build call needs.
#[derive(Debug, Clone, Copy)]
pub struct BuildInputs<'a> {
    pub metadata: &'a Metadata,
    pub resource_version: u64,
    pub reason: &'a BuildReason,
    pub invalidations: &'a CacheInvalidations,
    pub previous: &'a BuildArtifacts,
}

/// A finished build.
#[derive(Debug)]
pub struct BuildOutput {
    pub cache: SchemaCache,
    pub artifacts: BuildArtifacts,
}

/// Build a schema cache from a metadata document.
pub async fn build_schema_cache(inputs: BuildInputs<'_>, ctx: &BuildContext) -> BuildOutput {
    tracing::debug!(
        version = inputs.resource_version,
        reason = ?inputs.reason,
        "building schema cache"
    );

    let mut builder = Builder::new(inputs, ctx);
    builder.resolve_data_connectors().await;
    builder.resolve_sources().await;
    builder.resolve_remote_schemas().await;
    builder.prune();
    builder.resolve_root_fields();
    builder.resolve_collections();
    builder.resolve_opentelemetry();
    builder.prune();
    builder.finish()
}

/// State threaded through the stages of one build.
pub(crate) struct Builder<'a> {
    metadata: &'a Metadata,
    reason: &'a BuildReason,
    invalidations: &'a CacheInvalidations,
    previous: &'a BuildArtifacts,
    resource_version: u64,
    ctx: &'a BuildContext,

    artifacts: BuildArtifacts,
    backends: HashMap<SourceName, Arc<dyn BackendMetadata>>,
    cache: SchemaCache,
    ledger: InconsistencyLedger,
    dependencies: Vec<MetadataDependency>,
}

impl<'a> Builder<'a> {
    fn new(inputs: BuildInputs<'a>, ctx: &'a BuildContext) -> Self {
        Self {
            metadata: inputs.metadata,
            reason: inputs.reason,
            invalidations: inputs.invalidations,
            previous: inputs.previous,
            resource_version: inputs.resource_version,
            ctx,
            artifacts: BuildArtifacts::default(),
            backends: HashMap::new(),
            cache: SchemaCache::default(),
            ledger: InconsistencyLedger::new(),
            dependencies: Vec::new(),
        }
    }

    /// Record that the schema object produced by `owner` depends on `target`.
    fn depend(&mut self, owner: &MetadataObject, target: SchemaObjId, reason: DependencyReason) {
        let Some(schema_obj) = owner.id.schema_obj_id() else {
            return;
        };
        self.dependencies.push(MetadataDependency {
            owner: owner.clone(),
            schema_obj,
            dependency: SchemaDependency::new(target, reason),
        });
    }

    fn depend_all(&mut self, owner: &MetadataObject, deps: Vec<SchemaDependency>) {
        for dep in deps {
            self.depend(owner, dep.target, dep.reason);
        }
    }

    /// Pass a success through, or record the failure against `object`.
    fn record<T>(&mut self, object: &MetadataObject, result: ResolveResult<T>) -> Option<T> {
        self.ledger.with_record(object, result)
    }

    /// Keep the first of each group of items sharing a key; every member of
    /// a group with more than one item is reported as a duplicate and dropped.
    fn unique<'t, T, K>(
        &mut self,
        items: impl IntoIterator<Item = &'t T>,
        key: impl Fn(&T) -> K,
        id: impl Fn(&T) -> MetadataObjId,
    ) -> Vec<&'t T>
    where
        T: Serialize + 't,
        K: Ord,
    {
        let mut groups: BTreeMap<K, Vec<&'t T>> = BTreeMap::new();
        let mut order = Vec::new();
        for item in items {
            let k = key(item);
            let group = groups.entry(k).or_default();
            if group.is_empty() {
                order.push(item);
            }
            group.push(item);
        }

        let mut kept = Vec::with_capacity(order.len());
        for item in order {
            let group = &groups[&key(item)];
            if group.len() == 1 {
                kept.push(item);
            } else {
                let objects = group
                    .iter()
                    .map(|i| MetadataObject::from_def(id(i), *i))
                    .collect();
                self.ledger.record_duplicate(objects);
            }
        }
        kept
    }

    fn backend(&self, source: &SourceName) -> Option<Arc<dyn BackendMetadata>> {
        self.backends.get(source).cloned()
    }

    /// The adapter and the partially built info of a resolved source.
    fn source_parts(&self, source: &SourceName) -> ResolveResult<(Arc<dyn BackendMetadata>, &SourceInfo)> {
        match (self.backend(source), self.cache.source(source)) {
            (Some(backend), Some(info)) => Ok((backend, info)),
            _ => Err(ResolveError::not_exists("source", source)),
        }
    }

    fn database(&self, source: &SourceName) -> Option<&DatabaseMetadata> {
        self.artifacts.databases.get(source).map(|d| &d.value)
    }

    /// Whether `scalar` is a type the source understands, counting the
    /// scalars its data connector agent declares.
    fn known_scalar(&self, source: &SourceName, scalar: &ScalarType) -> bool {
        if self
            .database(source)
            .map(|db| db.has_scalar(scalar))
            .unwrap_or(false)
        {
            return true;
        }
        match self.cache.sources.get(source).map(|s| &s.kind) {
            Some(crate::metadata::BackendKind::DataConnector(agent)) => self
                .cache
                .data_connectors
                .get(agent)
                .map(|a| a.scalar_types.contains(scalar))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn finish(self) -> BuildOutput {
        let mut cache = self.cache;
        cache.dependencies = DependencyGraph::from_dependencies(&self.dependencies);
        cache.inconsistent_objects = self.ledger.into_entries();
        cache.metadata_resource_version = self.resource_version;

        tracing::debug!(
            sources = cache.sources.len(),
            dependencies = cache.dependencies.edge_count(),
            inconsistent = cache.inconsistent_objects.len(),
            "schema cache built"
        );

        BuildOutput {
            cache,
            artifacts: self.artifacts,
        }
    }
}

/// The metadata object with id `id`, with its definition looked up in the
/// document. An id that is not in the document gets a `null` definition.
pub fn metadata_object(metadata: &Metadata, id: &MetadataObjId) -> MetadataObject {
    fn def<T: Serialize>(id: &MetadataObjId, value: Option<&T>) -> MetadataObject {
        match value {
            Some(v) => MetadataObject::from_def(id.clone(), v),
            None => MetadataObject::new(id.clone(), serde_json::Value::Null),
        }
    }

    match id {
        MetadataObjId::Source { source } => def(id, metadata.source(source)),
        MetadataObjId::SourceObj { source, object } => {
            let Some(source) = metadata.source(source) else {
                return def::<()>(id, None);
            };
            match object {
                SourceMetadataObjId::Table { table } => def(id, source.table(table)),
                SourceMetadataObjId::Function { function } => {
                    def(id, source.functions.iter().find(|f| &f.function == function))
                }
                SourceMetadataObjId::LogicalModel { name } => {
                    def(id, source.logical_models.iter().find(|m| &m.name == name))
                }
                SourceMetadataObjId::NativeQuery { name } => def(
                    id,
                    source.native_queries.iter().find(|q| &q.root_field_name == name),
                ),
                SourceMetadataObjId::TableObj { table, object } => {
                    let Some(table) = source.table(table) else {
                        return def::<()>(id, None);
                    };
                    match object {
                        TableMetadataObjId::Relationship { name, .. } => {
                            if let Some(r) = table.object_relationships.iter().find(|r| &r.name == name) {
                                return def(id, Some(r));
                            }
                            def(id, table.array_relationships.iter().find(|r| &r.name == name))
                        }
                        TableMetadataObjId::ComputedField { name } => {
                            def(id, table.computed_fields.iter().find(|c| &c.name == name))
                        }
                        TableMetadataObjId::Permission { role, perm_type } => {
                            use crate::metadata::PermType;
                            match perm_type {
                                PermType::Select => def(id, table.select_permissions.iter().find(|p| &p.role == role)),
                                PermType::Insert => def(id, table.insert_permissions.iter().find(|p| &p.role == role)),
                                PermType::Update => def(id, table.update_permissions.iter().find(|p| &p.role == role)),
                                PermType::Delete => def(id, table.delete_permissions.iter().find(|p| &p.role == role)),
                            }
                        }
                        TableMetadataObjId::EventTrigger { name } => {
                            def(id, table.event_triggers.iter().find(|t| &t.name == name))
                        }
                    }
                }
                SourceMetadataObjId::LogicalModelObj { name, object } => {
                    let model = source.logical_models.iter().find(|m| &m.name == name);
                    match object {
                        LogicalModelMetadataObjId::Permission { role } => def(
                            id,
                            model.and_then(|m| m.select_permissions.iter().find(|p| &p.role == role)),
                        ),
                    }
                }
            }
        }
        MetadataObjId::RemoteSchema { name } => def(id, metadata.remote_schema(name)),
        MetadataObjId::RemoteSchemaPermission { name, role } => def(
            id,
            metadata
                .remote_schema(name)
                .and_then(|r| r.permissions.iter().find(|p| &p.role == role)),
        ),
        MetadataObjId::QueryCollection { name } => def(id, metadata.query_collection(name)),
        MetadataObjId::Query { collection, query } => def(
            id,
            metadata
                .query_collection(collection)
                .and_then(|c| c.query(query)),
        ),
        MetadataObjId::Allowlist { collection } => {
            def(id, metadata.allowlist.iter().find(|a| &a.collection == collection))
        }
        MetadataObjId::Endpoint { name } => {
            def(id, metadata.rest_endpoints.iter().find(|e| &e.name == name))
        }
        MetadataObjId::DataConnector { name } => {
            def(id, metadata.backend_configs.dataconnector.get(name))
        }
        MetadataObjId::OpenTelemetry => def(id, metadata.opentelemetry.as_ref()),
    }
}
