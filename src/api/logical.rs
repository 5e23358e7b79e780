//! Logical models and native queries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::source::source_mut;
use super::{default_source, drop_object, no_database_changes, success};
use crate::engine::{MetadataEngine, MetadataError, MetadataResult};
use crate::metadata::names::*;
use crate::metadata::{LogicalModelMetadata, NativeQueryMetadata};
use crate::schema::MetadataObjId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackLogicalModel {
    #[serde(default = "default_source")]
    pub source: SourceName,
    #[serde(flatten)]
    pub model: LogicalModelMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntrackLogicalModel {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub name: LogicalModelName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackNativeQuery {
    #[serde(default = "default_source")]
    pub source: SourceName,
    #[serde(flatten)]
    pub query: NativeQueryMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntrackNativeQuery {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub root_field_name: NativeQueryName,
}

pub(crate) async fn track_logical_model(engine: &MetadataEngine, args: TrackLogicalModel) -> MetadataResult<Value> {
    let target = MetadataObjId::logical_model(&args.source, &args.model.name);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let source = source_mut(metadata, &args.source)?;
                if source.logical_models.iter().any(|m| m.name == args.model.name) {
                    return Err(MetadataError::already_exists(format!(
                        "logical model \"{}\" already exists in source \"{}\"",
                        args.model.name, args.source
                    )));
                }
                source.logical_models.push(args.model);
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

/// Refuses while a native query returns the model or another model nests it.
pub(crate) async fn untrack_logical_model(
    engine: &MetadataEngine,
    args: UntrackLogicalModel,
) -> MetadataResult<Value> {
    let exists = engine
        .metadata()
        .source(&args.source)
        .map(|s| s.logical_models.iter().any(|m| m.name == args.name))
        .unwrap_or(false);
    if !exists {
        return Err(MetadataError::not_exists(format!(
            "logical model \"{}\" not found in source \"{}\"",
            args.name, args.source
        )));
    }

    let target = MetadataObjId::logical_model(&args.source, &args.name);
    drop_object(engine, target, false, no_database_changes()).await
}

pub(crate) async fn track_native_query(engine: &MetadataEngine, args: TrackNativeQuery) -> MetadataResult<Value> {
    let target = MetadataObjId::native_query(&args.source, &args.query.root_field_name);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let source = source_mut(metadata, &args.source)?;
                if source
                    .native_queries
                    .iter()
                    .any(|q| q.root_field_name == args.query.root_field_name)
                {
                    return Err(MetadataError::already_exists(format!(
                        "native query \"{}\" already exists in source \"{}\"",
                        args.query.root_field_name, args.source
                    )));
                }
                source.native_queries.push(args.query);
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn untrack_native_query(
    engine: &MetadataEngine,
    args: UntrackNativeQuery,
) -> MetadataResult<Value> {
    let exists = engine
        .metadata()
        .source(&args.source)
        .map(|s| s.native_queries.iter().any(|q| q.root_field_name == args.root_field_name))
        .unwrap_or(false);
    if !exists {
        return Err(MetadataError::not_exists(format!(
            "native query \"{}\" not found in source \"{}\"",
            args.root_field_name, args.source
        )));
    }

    let target = MetadataObjId::native_query(&args.source, &args.root_field_name);
    drop_object(engine, target, false, no_database_changes()).await
}
