//! Data connector agents and sources: configuration, introspection, and the
//! per-source object stages.

use std::sync::Arc;

use futures::future::join_all;

use super::{Builder, Fingerprinted};
use crate::backend::{AgentInfo, BackendMetadata, DatabaseMetadata, ResolvedSourceConfig};
use crate::cache::hash::fingerprint;
use crate::cache::types::SourceInfo;
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::source::{BackendKind, SourceMetadata};
use crate::schema::{DependencyReason, MetadataObjId, MetadataObject, SchemaObjId};

/// A source whose adapter was found, waiting to be introspected.
struct SourcePlan<'s> {
    source: &'s SourceMetadata,
    object: MetadataObject,
    backend: Arc<dyn BackendMetadata>,
    agent: Option<AgentInfo>,
}

type Introspected = (Fingerprinted<ResolvedSourceConfig>, Fingerprinted<DatabaseMetadata>);

impl<'a> Builder<'a> {
    /// Fetch the description of every configured data connector agent,
    /// reusing the previous build's answer when the options did not change.
    pub(super) async fn resolve_data_connectors(&mut self) {
        let metadata = self.metadata;
        let ctx = self.ctx;

        let mut pending = Vec::new();
        for (name, options) in &metadata.backend_configs.dataconnector {
            let fp = fingerprint(options);
            let reusable = !self.invalidations.data_connectors.contains(name);
            match self.previous.agents.get(name) {
                Some(prev) if reusable && prev.fingerprint == fp => {
                    self.cache.data_connectors.insert(name.clone(), prev.value.clone());
                    self.artifacts.agents.insert(name.clone(), prev.clone());
                }
                _ => pending.push((name, options, fp)),
            }
        }

        let fetched = join_all(
            pending
                .iter()
                .map(|(name, options, _)| ctx.agents.fetch_agent_info(name, options)),
        )
        .await;

        for ((name, options, fp), result) in pending.into_iter().zip(fetched) {
            let object = MetadataObject::from_def(
                MetadataObjId::DataConnector { name: name.clone() },
                options,
            );
            let Some(agent) = self.record(&object, result.map_err(ResolveError::from)) else {
                continue;
            };
            tracing::debug!(agent = %name, "fetched data connector agent");
            self.cache.data_connectors.insert(name.clone(), agent.clone());
            self.artifacts.agents.insert(
                name.clone(),
                Fingerprinted {
                    fingerprint: fp,
                    value: agent,
                },
            );
        }
    }

    /// Resolve every source, then everything tracked inside the ones that
    /// resolved. Sources are introspected concurrently.
    pub(super) async fn resolve_sources(&mut self) {
        let metadata = self.metadata;
        let sources = self.unique(
            &metadata.sources,
            |s| s.name.clone(),
            |s| MetadataObjId::source(&s.name),
        );

        let mut plans = Vec::with_capacity(sources.len());
        for source in sources {
            let object = MetadataObject::from_def(MetadataObjId::source(&source.name), source);
            let plan = self.plan_source(source);
            if let Some((backend, agent)) = self.record(&object, plan) {
                plans.push(SourcePlan {
                    source,
                    object,
                    backend,
                    agent,
                });
            }
        }

        let introspected = join_all(plans.iter().map(|plan| self.introspect_source(plan))).await;

        let mut resolved = Vec::with_capacity(plans.len());
        for (plan, result) in plans.into_iter().zip(introspected) {
            let Some((config, database)) = self.record(&plan.object, result) else {
                continue;
            };
            let name = plan.source.name.clone();

            let mut effective = config.value.clone();
            if let BackendKind::DataConnector(agent_name) = &plan.source.kind {
                if let Some(agent) = &plan.agent {
                    effective.capabilities = agent.capabilities;
                }
                self.depend(
                    &plan.object,
                    SchemaObjId::DataConnector {
                        name: agent_name.clone(),
                    },
                    DependencyReason::DataConnector,
                );
            }

            tracing::debug!(
                source = %name,
                backend = plan.backend.family(),
                tables = database.value.tables.len(),
                "resolved source"
            );

            self.cache
                .sources
                .insert(name.clone(), SourceInfo::new(name.clone(), effective));
            self.backends.insert(name.clone(), plan.backend);
            self.artifacts.source_configs.insert(name.clone(), config);
            self.artifacts.databases.insert(name, database);
            resolved.push(plan.source);
        }

        for source in resolved {
            self.resolve_source_objects(source).await;
        }
    }

    /// Find the adapter for a source, and the agent for data connector kinds.
    fn plan_source(
        &self,
        source: &SourceMetadata,
    ) -> ResolveResult<(Arc<dyn BackendMetadata>, Option<AgentInfo>)> {
        let backend = self.ctx.backends.get(&source.kind).ok_or_else(|| {
            ResolveError::new(format!("backend kind {} is not supported", source.kind))
        })?;

        let agent = match &source.kind {
            BackendKind::DataConnector(name) => Some(
                self.cache
                    .data_connectors
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ResolveError::not_exists("data connector", name))?,
            ),
            _ => None,
        };

        Ok((backend, agent))
    }

    async fn introspect_source(&self, plan: &SourcePlan<'_>) -> ResolveResult<Introspected> {
        let source = plan.source;
        let env = &self.ctx.app.environment;
        let fp = fingerprint(&(&source.kind, &source.configuration, env));
        let invalidated = self.invalidations.sources.contains(&source.name);

        let config = match self.previous.source_configs.get(&source.name) {
            Some(prev) if !invalidated && prev.fingerprint == fp => prev.clone(),
            _ => Fingerprinted {
                fingerprint: fp.clone(),
                value: plan
                    .backend
                    .resolve_source_config(&source.name, &source.kind, &source.configuration, env)
                    .await?,
            },
        };

        let refetch = invalidated || self.reason.is_sync() || self.reason.affects(&source.name);
        let database = match self.previous.databases.get(&source.name) {
            Some(prev) if !refetch && prev.fingerprint == fp => prev.clone(),
            _ => {
                tracing::debug!(source = %source.name, "introspecting source");
                Fingerprinted {
                    fingerprint: fp,
                    value: plan
                        .backend
                        .resolve_database_metadata(&source.name, &config.value)
                        .await?,
                }
            }
        };

        Ok((config, database))
    }

    /// Everything tracked inside one resolved source, in dependency order.
    async fn resolve_source_objects(&mut self, source: &'a SourceMetadata) {
        let Some(db) = self.database(&source.name).cloned() else {
            return;
        };

        self.resolve_tables(source, &db).await;
        self.resolve_functions(source, &db);
        self.resolve_computed_fields(source, &db);
        self.resolve_relationships(source, &db);
        self.resolve_logical_models(source);
        self.resolve_native_queries(source);
        self.resolve_permissions(source);
        self.resolve_event_triggers(source).await;
    }
}
