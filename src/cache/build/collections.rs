//! Root fields, query collections, the allow list, REST endpoints and the
//! OpenTelemetry configuration: everything checked against the GraphQL
//! surface once sources and remote schemas are resolved.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use super::{metadata_object, Builder};
use crate::cache::types::{AnalyzedQuery, CollectionInfo, EndpointInfo};
use crate::graphql::document::OperationKind;
use crate::graphql::{analyze_query, resolve_root_fields, table_root_fields, RootFieldClaim, RootType};
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::collections::{
    HttpMethod, ListedQuery, OpenTelemetryConfig, OtelDataType, OtelStatus, QueryCollection, RestEndpoint,
};
use crate::metadata::names::*;
use crate::metadata::source::FunctionExposedAs;
use crate::schema::{DependencyReason, MetadataObjId, MetadataObject, SchemaObjId};

impl<'a> Builder<'a> {
    /// Collect the root fields every resolved object claims. Every owner of
    /// a contested field is reported and taken out of the cache.
    pub(super) fn resolve_root_fields(&mut self) {
        let metadata = self.metadata;
        let mut claims = Vec::new();

        for source in self.cache.sources.values() {
            for table in source.tables.values() {
                let owner = MetadataObjId::table(&source.name, &table.name);
                for (root, name) in table_root_fields(table) {
                    claims.push(RootFieldClaim {
                        root,
                        name,
                        owner: owner.clone(),
                    });
                }
            }
            for function in source.functions.values() {
                let root = match function.exposed_as {
                    FunctionExposedAs::Query => RootType::Query,
                    FunctionExposedAs::Mutation => RootType::Mutation,
                };
                claims.push(RootFieldClaim {
                    root,
                    name: function.graphql_name.clone(),
                    owner: MetadataObjId::function(&source.name, &function.name),
                });
            }
            for query in source.native_queries.values() {
                claims.push(RootFieldClaim {
                    root: RootType::Query,
                    name: query.root_field_name.to_string(),
                    owner: MetadataObjId::native_query(&source.name, &query.root_field_name),
                });
            }
        }
        for remote in self.cache.remote_schemas.values() {
            let owner = MetadataObjId::remote_schema(&remote.name);
            let fields = remote
                .introspection
                .query_root
                .iter()
                .map(|f| (RootType::Query, f))
                .chain(remote.introspection.mutation_root.iter().map(|f| (RootType::Mutation, f)));
            for (root, name) in fields {
                claims.push(RootFieldClaim {
                    root,
                    name: name.clone(),
                    owner: owner.clone(),
                });
            }
        }

        let (mut fields, conflicts) = resolve_root_fields(claims);

        let mut evicted = BTreeSet::new();
        for conflict in &conflicts {
            let objects = conflict
                .owners
                .iter()
                .map(|id| metadata_object(metadata, id))
                .collect();
            self.ledger.record_conflict(objects, conflict.reason());
            evicted.extend(conflict.owners.iter().cloned());
        }
        for owner in &evicted {
            tracing::debug!(object = %owner, "evicting owner of a conflicting root field");
            self.cache.remove_object(owner);
        }
        fields.query.retain(|_, owner| !evicted.contains(owner));
        fields.mutation.retain(|_, owner| !evicted.contains(owner));

        self.cache.root_fields = fields;
    }

    /// Check every saved query against the root fields, then the allow list
    /// and REST endpoints built on them.
    pub(super) fn resolve_collections(&mut self) {
        let metadata = self.metadata;
        let collections = self.unique(
            &metadata.query_collections,
            |c| c.name.clone(),
            |c| MetadataObjId::QueryCollection { name: c.name.clone() },
        );

        for collection in collections {
            let info = self.build_collection(collection);
            self.cache.query_collections.insert(collection.name.clone(), info);
        }

        self.resolve_allowlist();
        self.resolve_endpoints();
    }

    fn build_collection(&mut self, collection: &'a QueryCollection) -> CollectionInfo {
        let metadata = self.metadata;
        let queries = self.unique(
            &collection.definition.queries,
            |q| q.name.clone(),
            |q| MetadataObjId::Query {
                collection: collection.name.clone(),
                query: q.name.clone(),
            },
        );

        let mut info = CollectionInfo {
            name: collection.name.clone(),
            queries: BTreeMap::new(),
        };
        for query in queries {
            let object = MetadataObject::from_def(
                MetadataObjId::Query {
                    collection: collection.name.clone(),
                    query: query.name.clone(),
                },
                query,
            );
            let result = analyze_query(&query.query, &self.cache.root_fields)
                .map_err(|reason| query_failure(metadata, &collection.name, query, reason));
            if let Some(operations) = self.record(&object, result) {
                info.queries.insert(
                    query.name.clone(),
                    AnalyzedQuery {
                        name: query.name.clone(),
                        query: query.query.clone(),
                        operations,
                    },
                );
            }
        }
        info
    }

    fn resolve_allowlist(&mut self) {
        let metadata = self.metadata;
        let entries = self.unique(
            &metadata.allowlist,
            |a| a.collection.clone(),
            |a| MetadataObjId::Allowlist {
                collection: a.collection.clone(),
            },
        );

        for entry in entries {
            let object = MetadataObject::from_def(
                MetadataObjId::Allowlist {
                    collection: entry.collection.clone(),
                },
                entry,
            );
            let result = if self.cache.query_collections.contains_key(&entry.collection) {
                Ok(())
            } else {
                Err(ResolveError::not_exists("query collection", &entry.collection))
            };
            if self.record(&object, result).is_some() {
                self.depend(
                    &object,
                    SchemaObjId::QueryCollection {
                        name: entry.collection.clone(),
                    },
                    DependencyReason::Untyped,
                );
                self.cache
                    .allowlist
                    .insert(entry.collection.clone(), entry.scope.clone());
            }
        }
    }

    fn resolve_endpoints(&mut self) {
        let metadata = self.metadata;
        let endpoints = self.unique(
            &metadata.rest_endpoints,
            |e| e.name.clone(),
            |e| MetadataObjId::Endpoint { name: e.name.clone() },
        );

        let mut resolved = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let object = MetadataObject::from_def(
                MetadataObjId::Endpoint {
                    name: endpoint.name.clone(),
                },
                endpoint,
            );
            let result = self.build_endpoint(endpoint);
            if let Some(info) = self.record(&object, result) {
                let query = &endpoint.definition.query;
                self.depend(
                    &object,
                    SchemaObjId::Query {
                        collection: query.collection_name.clone(),
                        query: query.query_name.clone(),
                    },
                    DependencyReason::Query,
                );
                self.cache.endpoints.insert(info.name.clone(), info);
                resolved.push(endpoint);
            }
        }

        for (route, method, group) in route_conflicts(&resolved) {
            let objects = group
                .iter()
                .map(|e| metadata_object(metadata, &MetadataObjId::Endpoint { name: e.name.clone() }))
                .collect();
            self.ledger.record_conflict(
                objects,
                format!("conflicting definitions for REST endpoint route {} {}", method, route),
            );
            for endpoint in group {
                self.cache.endpoints.remove(&endpoint.name);
            }
        }
    }

    fn build_endpoint(&self, endpoint: &RestEndpoint) -> ResolveResult<EndpointInfo> {
        if endpoint.url.trim_matches('/').is_empty() {
            return Err(ResolveError::new("the endpoint url must not be empty"));
        }
        if endpoint.methods.is_empty() {
            return Err(ResolveError::new("the endpoint must allow at least one method"));
        }

        let reference = &endpoint.definition.query;
        let query = self
            .cache
            .query_collections
            .get(&reference.collection_name)
            .and_then(|c| c.queries.get(&reference.query_name))
            .ok_or_else(|| {
                ResolveError::new(format!(
                    "query with name \"{}\" not found in collection \"{}\"",
                    reference.query_name, reference.collection_name
                ))
            })?;

        let operation = match query.operations.as_slice() {
            [op] => op.kind,
            _ => {
                return Err(ResolveError::new(
                    "a REST endpoint query must contain exactly one operation",
                ))
            }
        };
        if operation == OperationKind::Subscription {
            return Err(ResolveError::new(
                "subscriptions cannot be served from REST endpoints",
            ));
        }

        Ok(EndpointInfo {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            methods: endpoint.methods.clone(),
            query: reference.clone(),
            operation,
        })
    }

    pub(super) fn resolve_opentelemetry(&mut self) {
        let metadata = self.metadata;
        let Some(config) = &metadata.opentelemetry else {
            return;
        };
        let object = MetadataObject::from_def(MetadataObjId::OpenTelemetry, config);
        if self.record(&object, check_opentelemetry(config)).is_some() {
            self.cache.opentelemetry = Some(config.clone());
        }
    }
}

/// A saved query failure, annotated with who uses the query.
fn query_failure(
    metadata: &crate::metadata::Metadata,
    collection: &CollectionName,
    query: &ListedQuery,
    reason: String,
) -> ResolveError {
    let allowlist: Vec<&CollectionName> = metadata
        .allowlist
        .iter()
        .filter(|a| &a.collection == collection)
        .map(|a| &a.collection)
        .collect();
    let endpoints: Vec<&EndpointName> = metadata
        .rest_endpoints
        .iter()
        .filter(|e| {
            &e.definition.query.collection_name == collection && e.definition.query.query_name == query.name
        })
        .map(|e| &e.name)
        .collect();

    ResolveError::with_context(
        reason,
        json!({ "allowlist": allowlist, "rest_endpoints": endpoints }),
    )
}

/// Groups of endpoints serving the same method on the same route shape.
fn route_conflicts<'e>(endpoints: &[&'e RestEndpoint]) -> Vec<(String, HttpMethod, Vec<&'e RestEndpoint>)> {
    let mut routes: BTreeMap<(String, HttpMethod), Vec<&'e RestEndpoint>> = BTreeMap::new();
    for endpoint in endpoints {
        let shape = endpoint.route_shape();
        for method in &endpoint.methods {
            let group = routes.entry((shape.clone(), *method)).or_default();
            if !group.iter().any(|e| e.name == endpoint.name) {
                group.push(endpoint);
            }
        }
    }
    routes
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .map(|((shape, method), group)| (shape, method, group))
        .collect()
}

fn check_opentelemetry(config: &OpenTelemetryConfig) -> ResolveResult<()> {
    if config.status == OtelStatus::Disabled {
        return Ok(());
    }
    let exporter = &config.exporter_otlp;
    let endpoints = [
        (OtelDataType::Traces, "otlp_traces_endpoint", &exporter.otlp_traces_endpoint),
        (OtelDataType::Metrics, "otlp_metrics_endpoint", &exporter.otlp_metrics_endpoint),
    ];
    for (data_type, field, endpoint) in endpoints {
        if !config.data_types.contains(&data_type) {
            continue;
        }
        match endpoint {
            None => {
                return Err(ResolveError::new(format!(
                    "{} is required when {:?} export is enabled",
                    field, data_type
                )))
            }
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(ResolveError::new(format!(
                    "{} must be an http or https URL, found \"{}\"",
                    field, url
                )))
            }
            Some(_) => {}
        }
    }
    if config.batch_span_processor.max_export_batch_size == 0 {
        return Err(ResolveError::new(
            "max_export_batch_size must be greater than zero",
        ));
    }
    Ok(())
}
