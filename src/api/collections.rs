//! Query collections, the allow list and REST endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{drop_object, no_database_changes, success};
use crate::engine::{MetadataEngine, MetadataError, MetadataResult};
use crate::metadata::names::*;
use crate::metadata::{AllowlistEntry, AllowlistScope, CollectionDef, QueryCollection, RestEndpoint};
use crate::schema::MetadataObjId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateQueryCollection {
    pub name: CollectionName,
    #[serde(default)]
    pub definition: CollectionDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropQueryCollection {
    pub collection: CollectionName,
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddCollectionToAllowlist {
    pub collection: CollectionName,
    #[serde(default)]
    pub scope: AllowlistScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropCollectionFromAllowlist {
    pub collection: CollectionName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateRestEndpoint(pub RestEndpoint);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRestEndpoint {
    pub name: EndpointName,
}

pub(crate) async fn create_query_collection(
    engine: &MetadataEngine,
    args: CreateQueryCollection,
) -> MetadataResult<Value> {
    let target = MetadataObjId::QueryCollection {
        name: args.name.clone(),
    };
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                if metadata.query_collection(&args.name).is_some() {
                    return Err(MetadataError::already_exists(format!(
                        "query collection with name \"{}\" already exists",
                        args.name
                    )));
                }
                metadata.query_collections.push(QueryCollection {
                    name: args.name,
                    definition: args.definition,
                    comment: args.comment,
                });
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

/// Refuses while the allow list or a REST endpoint uses the collection,
/// unless `cascade` is set.
pub(crate) async fn drop_query_collection(
    engine: &MetadataEngine,
    args: DropQueryCollection,
) -> MetadataResult<Value> {
    if engine.metadata().query_collection(&args.collection).is_none() {
        return Err(MetadataError::not_exists(format!(
            "query collection with name \"{}\" does not exist",
            args.collection
        )));
    }
    let target = MetadataObjId::QueryCollection {
        name: args.collection,
    };
    drop_object(engine, target, args.cascade, no_database_changes()).await
}

pub(crate) async fn add_collection_to_allowlist(
    engine: &MetadataEngine,
    args: AddCollectionToAllowlist,
) -> MetadataResult<Value> {
    let target = MetadataObjId::Allowlist {
        collection: args.collection.clone(),
    };
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                if metadata.query_collection(&args.collection).is_none() {
                    return Err(MetadataError::not_exists(format!(
                        "query collection with name \"{}\" does not exist",
                        args.collection
                    )));
                }
                if metadata.allowlist.iter().any(|a| a.collection == args.collection) {
                    return Err(MetadataError::already_exists(format!(
                        "collection \"{}\" already exists in the allow list",
                        args.collection
                    )));
                }
                metadata.allowlist.push(AllowlistEntry {
                    collection: args.collection,
                    scope: args.scope,
                });
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn drop_collection_from_allowlist(
    engine: &MetadataEngine,
    args: DropCollectionFromAllowlist,
) -> MetadataResult<Value> {
    if !engine.metadata().allowlist.iter().any(|a| a.collection == args.collection) {
        return Err(MetadataError::not_exists(format!(
            "collection \"{}\" does not exist in the allow list",
            args.collection
        )));
    }
    let target = MetadataObjId::Allowlist {
        collection: args.collection,
    };
    drop_object(engine, target, false, no_database_changes()).await
}

pub(crate) async fn create_rest_endpoint(engine: &MetadataEngine, args: CreateRestEndpoint) -> MetadataResult<Value> {
    let endpoint = args.0;
    let target = MetadataObjId::Endpoint {
        name: endpoint.name.clone(),
    };
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                if metadata.rest_endpoints.iter().any(|e| e.name == endpoint.name) {
                    return Err(MetadataError::already_exists(format!(
                        "endpoint with name \"{}\" already exists",
                        endpoint.name
                    )));
                }
                metadata.rest_endpoints.push(endpoint);
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn drop_rest_endpoint(engine: &MetadataEngine, args: DropRestEndpoint) -> MetadataResult<Value> {
    if !engine.metadata().rest_endpoints.iter().any(|e| e.name == args.name) {
        return Err(MetadataError::not_exists(format!(
            "endpoint with name \"{}\" does not exist",
            args.name
        )));
    }
    let target = MetadataObjId::Endpoint { name: args.name };
    drop_object(engine, target, false, no_database_changes()).await
}
