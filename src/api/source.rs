//! Sources and tracked functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{default_source, drop_object, success};
use crate::cache::BuildReason;
use crate::engine::{MetadataEngine, MetadataError, MetadataResult};
use crate::metadata::names::*;
use crate::metadata::{BackendKind, FunctionConfig, FunctionMetadata, Metadata, SourceMetadata};
use crate::schema::MetadataObjId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSource {
    pub name: SourceName,
    pub kind: BackendKind,
    #[serde(default)]
    pub configuration: Value,
    /// Update the configuration of an existing source instead of failing.
    #[serde(default)]
    pub replace_configuration: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropSource {
    pub name: SourceName,
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFunction {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub function: FunctionName,
    #[serde(default)]
    pub configuration: FunctionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntrackFunction {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub function: FunctionName,
}

/// The source named `name`, or a `not-exists` error.
pub(crate) fn source_mut<'m>(
    metadata: &'m mut Metadata,
    name: &SourceName,
) -> MetadataResult<&'m mut SourceMetadata> {
    metadata
        .source_mut(name)
        .ok_or_else(|| MetadataError::not_exists(format!("source with name \"{}\" does not exist", name)))
}

pub(crate) async fn add_source(engine: &MetadataEngine, args: AddSource) -> MetadataResult<Value> {
    let target = MetadataObjId::source(&args.name);
    let reason = BuildReason::update_source(&args.name);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                if let Some(existing) = metadata.source_mut(&args.name) {
                    if !args.replace_configuration {
                        return Err(MetadataError::already_exists(format!(
                            "source with name \"{}\" already exists",
                            args.name
                        )));
                    }
                    if existing.kind != args.kind {
                        return Err(MetadataError::invalid(format!(
                            "source \"{}\" is of kind {}, not {}",
                            args.name, existing.kind, args.kind
                        )));
                    }
                    existing.configuration = args.configuration;
                    return Ok(());
                }

                let mut source = SourceMetadata::new(args.name, args.kind);
                source.configuration = args.configuration;
                metadata.sources.push(source);
                Ok(())
            },
            reason,
        )
        .await?;
    Ok(success())
}

/// Remove a source, then let its backend clean up after it.
pub(crate) async fn drop_source(engine: &MetadataEngine, args: DropSource) -> MetadataResult<Value> {
    let metadata = engine.metadata();
    let Some(source) = metadata.source(&args.name) else {
        return Err(MetadataError::not_exists(format!(
            "source with name \"{}\" does not exist",
            args.name
        )));
    };
    let kind = source.kind.clone();
    let config = engine.cache().source(&args.name).map(|info| info.config.clone());

    let target = MetadataObjId::source(&args.name);
    let result = drop_object(engine, target, args.cascade, BuildReason::update_source(&args.name)).await?;

    match (engine.backends().get(&kind), config) {
        (Some(backend), Some(config)) => {
            if let Err(e) = backend.post_drop_source_hook(&args.name, &config).await {
                tracing::warn!(source = %args.name, error = %e, "post-drop cleanup failed");
            }
        }
        _ => tracing::debug!(source = %args.name, "source was not resolved, skipping post-drop cleanup"),
    }
    Ok(result)
}

pub(crate) async fn track_function(engine: &MetadataEngine, args: TrackFunction) -> MetadataResult<Value> {
    let target = MetadataObjId::function(&args.source, &args.function);
    let reason = BuildReason::update_source(&args.source);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let source = source_mut(metadata, &args.source)?;
                if source.functions.iter().any(|f| f.function == args.function) {
                    return Err(MetadataError::already_exists(format!(
                        "function already tracked: {}",
                        args.function
                    )));
                }
                source.functions.push(FunctionMetadata {
                    function: args.function,
                    configuration: args.configuration,
                });
                Ok(())
            },
            reason,
        )
        .await?;
    Ok(success())
}

pub(crate) async fn untrack_function(engine: &MetadataEngine, args: UntrackFunction) -> MetadataResult<Value> {
    let tracked = engine
        .metadata()
        .source(&args.source)
        .map(|s| s.functions.iter().any(|f| f.function == args.function))
        .unwrap_or(false);
    if !tracked {
        return Err(MetadataError::not_exists(format!(
            "function not found in metadata: {}",
            args.function
        )));
    }

    let target = MetadataObjId::function(&args.source, &args.function);
    drop_object(engine, target, false, super::no_database_changes()).await
}
