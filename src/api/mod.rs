//! Metadata API commands.
//!
//! Commands arrive as `{"type": "<command>", "args": {...}}` and are executed
//! one at a time against a [`MetadataEngine`]. Creating or tracking an object
//! rebuilds with that object as the target, so a failure names the object's
//! own problem. Dropping an object first refuses when other objects depend on
//! it (or removes them too, with `cascade`), then rebuilds expecting no new
//! inconsistencies.

mod collections;
mod logical;
mod remote;
mod source;
mod table;

pub use collections::*;
pub use logical::*;
pub use remote::*;
pub use source::*;
pub use table::*;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::{BuildReason, SchemaCache};
use crate::engine::{MetadataEngine, MetadataError, MetadataResult, ReloadMetadata};
use crate::inconsistency::inconsistent_ids;
use crate::metadata::names::*;
use crate::metadata::{validate, DataConnectorOptions, Metadata, OpenTelemetryConfig};
use crate::schema::MetadataObjId;

/// A metadata API request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum MetadataCommand {
    AddSource(AddSource),
    DropSource(DropSource),
    TrackTable(TrackTable),
    UntrackTable(UntrackTable),
    SetTableCustomization(SetTableCustomization),
    CreateObjectRelationship(CreateObjectRelationship),
    CreateArrayRelationship(CreateArrayRelationship),
    DropRelationship(DropRelationship),
    CreateSelectPermission(CreateSelectPermission),
    CreateInsertPermission(CreateInsertPermission),
    CreateUpdatePermission(CreateUpdatePermission),
    CreateDeletePermission(CreateDeletePermission),
    DropPermission(DropPermission),
    AddComputedField(AddComputedField),
    DropComputedField(DropComputedField),
    TrackFunction(TrackFunction),
    UntrackFunction(UntrackFunction),
    TrackLogicalModel(TrackLogicalModel),
    UntrackLogicalModel(UntrackLogicalModel),
    TrackNativeQuery(TrackNativeQuery),
    UntrackNativeQuery(UntrackNativeQuery),
    CreateEventTrigger(CreateEventTrigger),
    DeleteEventTrigger(DeleteEventTrigger),
    AddRemoteSchema(AddRemoteSchema),
    RemoveRemoteSchema(RemoveRemoteSchema),
    AddRemoteSchemaPermissions(AddRemoteSchemaPermissions),
    DropRemoteSchemaPermissions(DropRemoteSchemaPermissions),
    CreateQueryCollection(CreateQueryCollection),
    DropQueryCollection(DropQueryCollection),
    AddCollectionToAllowlist(AddCollectionToAllowlist),
    DropCollectionFromAllowlist(DropCollectionFromAllowlist),
    CreateRestEndpoint(CreateRestEndpoint),
    DropRestEndpoint(DropRestEndpoint),
    SetOpentelemetryConfig(OpenTelemetryConfig),
    AddDataConnector(AddDataConnector),
    ReloadMetadata(ReloadMetadata),
    GetInconsistentMetadata,
    DropInconsistentMetadata,
    ReplaceMetadata(ReplaceMetadata),
    ExportMetadata,
    Bulk(Vec<MetadataCommand>),
}

impl MetadataCommand {
    /// The `type` tag of the command, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MetadataCommand::AddSource(_) => "add_source",
            MetadataCommand::DropSource(_) => "drop_source",
            MetadataCommand::TrackTable(_) => "track_table",
            MetadataCommand::UntrackTable(_) => "untrack_table",
            MetadataCommand::SetTableCustomization(_) => "set_table_customization",
            MetadataCommand::CreateObjectRelationship(_) => "create_object_relationship",
            MetadataCommand::CreateArrayRelationship(_) => "create_array_relationship",
            MetadataCommand::DropRelationship(_) => "drop_relationship",
            MetadataCommand::CreateSelectPermission(_) => "create_select_permission",
            MetadataCommand::CreateInsertPermission(_) => "create_insert_permission",
            MetadataCommand::CreateUpdatePermission(_) => "create_update_permission",
            MetadataCommand::CreateDeletePermission(_) => "create_delete_permission",
            MetadataCommand::DropPermission(_) => "drop_permission",
            MetadataCommand::AddComputedField(_) => "add_computed_field",
            MetadataCommand::DropComputedField(_) => "drop_computed_field",
            MetadataCommand::TrackFunction(_) => "track_function",
            MetadataCommand::UntrackFunction(_) => "untrack_function",
            MetadataCommand::TrackLogicalModel(_) => "track_logical_model",
            MetadataCommand::UntrackLogicalModel(_) => "untrack_logical_model",
            MetadataCommand::TrackNativeQuery(_) => "track_native_query",
            MetadataCommand::UntrackNativeQuery(_) => "untrack_native_query",
            MetadataCommand::CreateEventTrigger(_) => "create_event_trigger",
            MetadataCommand::DeleteEventTrigger(_) => "delete_event_trigger",
            MetadataCommand::AddRemoteSchema(_) => "add_remote_schema",
            MetadataCommand::RemoveRemoteSchema(_) => "remove_remote_schema",
            MetadataCommand::AddRemoteSchemaPermissions(_) => "add_remote_schema_permissions",
            MetadataCommand::DropRemoteSchemaPermissions(_) => "drop_remote_schema_permissions",
            MetadataCommand::CreateQueryCollection(_) => "create_query_collection",
            MetadataCommand::DropQueryCollection(_) => "drop_query_collection",
            MetadataCommand::AddCollectionToAllowlist(_) => "add_collection_to_allowlist",
            MetadataCommand::DropCollectionFromAllowlist(_) => "drop_collection_from_allowlist",
            MetadataCommand::CreateRestEndpoint(_) => "create_rest_endpoint",
            MetadataCommand::DropRestEndpoint(_) => "drop_rest_endpoint",
            MetadataCommand::SetOpentelemetryConfig(_) => "set_opentelemetry_config",
            MetadataCommand::AddDataConnector(_) => "add_data_connector",
            MetadataCommand::ReloadMetadata(_) => "reload_metadata",
            MetadataCommand::GetInconsistentMetadata => "get_inconsistent_metadata",
            MetadataCommand::DropInconsistentMetadata => "drop_inconsistent_metadata",
            MetadataCommand::ReplaceMetadata(_) => "replace_metadata",
            MetadataCommand::ExportMetadata => "export_metadata",
            MetadataCommand::Bulk(_) => "bulk",
        }
    }
}

/// Execute one command.
pub fn run_command(engine: &MetadataEngine, command: MetadataCommand) -> BoxFuture<'_, MetadataResult<Value>> {
    async move {
        let name = command.name();
        tracing::debug!(command = name, "running metadata command");

        let result = match command {
            MetadataCommand::AddSource(args) => source::add_source(engine, args).await,
            MetadataCommand::DropSource(args) => source::drop_source(engine, args).await,
            MetadataCommand::TrackFunction(args) => source::track_function(engine, args).await,
            MetadataCommand::UntrackFunction(args) => source::untrack_function(engine, args).await,

            MetadataCommand::TrackTable(args) => table::track_table(engine, args).await,
            MetadataCommand::UntrackTable(args) => table::untrack_table(engine, args).await,
            MetadataCommand::SetTableCustomization(args) => {
                table::set_table_customization(engine, args).await
            }
            MetadataCommand::CreateObjectRelationship(args) => {
                table::create_object_relationship(engine, args).await
            }
            MetadataCommand::CreateArrayRelationship(args) => {
                table::create_array_relationship(engine, args).await
            }
            MetadataCommand::DropRelationship(args) => table::drop_relationship(engine, args).await,
            MetadataCommand::CreateSelectPermission(args) => {
                table::create_permission(engine, args).await
            }
            MetadataCommand::CreateInsertPermission(args) => {
                table::create_permission(engine, args).await
            }
            MetadataCommand::CreateUpdatePermission(args) => {
                table::create_permission(engine, args).await
            }
            MetadataCommand::CreateDeletePermission(args) => {
                table::create_permission(engine, args).await
            }
            MetadataCommand::DropPermission(args) => table::drop_permission(engine, args).await,
            MetadataCommand::AddComputedField(args) => table::add_computed_field(engine, args).await,
            MetadataCommand::DropComputedField(args) => {
                table::drop_computed_field(engine, args).await
            }
            MetadataCommand::CreateEventTrigger(args) => {
                table::create_event_trigger(engine, args).await
            }
            MetadataCommand::DeleteEventTrigger(args) => {
                table::delete_event_trigger(engine, args).await
            }

            MetadataCommand::TrackLogicalModel(args) => {
                logical::track_logical_model(engine, args).await
            }
            MetadataCommand::UntrackLogicalModel(args) => {
                logical::untrack_logical_model(engine, args).await
            }
            MetadataCommand::TrackNativeQuery(args) => logical::track_native_query(engine, args).await,
            MetadataCommand::UntrackNativeQuery(args) => {
                logical::untrack_native_query(engine, args).await
            }

            MetadataCommand::AddRemoteSchema(args) => remote::add_remote_schema(engine, args).await,
            MetadataCommand::RemoveRemoteSchema(args) => {
                remote::remove_remote_schema(engine, args).await
            }
            MetadataCommand::AddRemoteSchemaPermissions(args) => {
                remote::add_remote_schema_permissions(engine, args).await
            }
            MetadataCommand::DropRemoteSchemaPermissions(args) => {
                remote::drop_remote_schema_permissions(engine, args).await
            }

            MetadataCommand::CreateQueryCollection(args) => {
                collections::create_query_collection(engine, args).await
            }
            MetadataCommand::DropQueryCollection(args) => {
                collections::drop_query_collection(engine, args).await
            }
            MetadataCommand::AddCollectionToAllowlist(args) => {
                collections::add_collection_to_allowlist(engine, args).await
            }
            MetadataCommand::DropCollectionFromAllowlist(args) => {
                collections::drop_collection_from_allowlist(engine, args).await
            }
            MetadataCommand::CreateRestEndpoint(args) => {
                collections::create_rest_endpoint(engine, args).await
            }
            MetadataCommand::DropRestEndpoint(args) => {
                collections::drop_rest_endpoint(engine, args).await
            }

            MetadataCommand::SetOpentelemetryConfig(config) => {
                set_opentelemetry_config(engine, config).await
            }
            MetadataCommand::AddDataConnector(args) => add_data_connector(engine, args).await,
            MetadataCommand::ReloadMetadata(args) => {
                let report = engine.reload_metadata(&args).await?;
                let mut value = serde_json::to_value(report)?;
                if let Value::Object(map) = &mut value {
                    map.insert("message".to_string(), json!("success"));
                }
                Ok(value)
            }
            MetadataCommand::GetInconsistentMetadata => {
                Ok(serde_json::to_value(engine.inconsistency_report())?)
            }
            MetadataCommand::DropInconsistentMetadata => drop_inconsistent_metadata(engine).await,
            MetadataCommand::ReplaceMetadata(args) => replace_metadata(engine, args).await,
            MetadataCommand::ExportMetadata => Ok(serde_json::to_value(&*engine.metadata())?),
            MetadataCommand::Bulk(commands) => {
                let mut results = Vec::with_capacity(commands.len());
                for command in commands {
                    results.push(run_command(engine, command).await?);
                }
                Ok(Value::Array(results))
            }
        };

        if let Err(e) = &result {
            tracing::info!(command = name, code = %e.code, error = %e, "metadata command failed");
        }
        result
    }
    .boxed()
}

// ============================================================================
// Top-level commands
// ============================================================================

/// Arguments of `add_data_connector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDataConnector {
    pub name: DataConnectorName,
    #[serde(flatten)]
    pub options: DataConnectorOptions,
}

/// Arguments of `replace_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceMetadata {
    #[serde(default)]
    pub allow_inconsistent_metadata: bool,
    pub metadata: Metadata,
}

async fn set_opentelemetry_config(
    engine: &MetadataEngine,
    config: OpenTelemetryConfig,
) -> MetadataResult<Value> {
    engine
        .build_schema_cache_for(
            &MetadataObjId::OpenTelemetry,
            move |metadata| {
                metadata.opentelemetry = Some(config);
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

async fn add_data_connector(engine: &MetadataEngine, args: AddDataConnector) -> MetadataResult<Value> {
    let target = MetadataObjId::DataConnector {
        name: args.name.clone(),
    };
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                if metadata.backend_configs.dataconnector.contains_key(&args.name) {
                    return Err(MetadataError::already_exists(format!(
                        "data connector \"{}\" already exists",
                        args.name
                    )));
                }
                metadata
                    .backend_configs
                    .dataconnector
                    .insert(args.name, args.options);
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

async fn drop_inconsistent_metadata(engine: &MetadataEngine) -> MetadataResult<Value> {
    let ids = inconsistent_ids(&engine.cache().inconsistent_objects);
    tracing::info!(objects = ids.len(), "dropping inconsistent metadata");
    engine
        .build_schema_cache(
            move |metadata| {
                for id in &ids {
                    metadata.purge(id);
                }
                Ok(())
            },
            Default::default(),
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

async fn replace_metadata(engine: &MetadataEngine, args: ReplaceMetadata) -> MetadataResult<Value> {
    validate(&args.metadata)?;
    let ReplaceMetadata {
        allow_inconsistent_metadata,
        metadata: replacement,
    } = args;
    let modifier = move |metadata: &mut Metadata| -> MetadataResult<()> {
        *metadata = replacement;
        Ok(())
    };

    if allow_inconsistent_metadata {
        engine
            .build_schema_cache(modifier, Default::default(), BuildReason::update_all())
            .await?;
        let mut value = serde_json::to_value(engine.inconsistency_report())?;
        if let Value::Object(map) = &mut value {
            map.insert("message".to_string(), json!("success"));
        }
        Ok(value)
    } else {
        engine
            .build_schema_cache_checked(modifier, BuildReason::update_all())
            .await?;
        Ok(success())
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

pub(crate) fn default_source() -> SourceName {
    SourceName::new("default")
}

pub(crate) fn success() -> Value {
    json!({ "message": "success" })
}

/// A build that installs nothing in any database.
pub(crate) fn no_database_changes() -> BuildReason {
    BuildReason::CatalogUpdate(Some(Default::default()))
}

/// Metadata objects owning something that depends on `target`, excluding
/// objects nested in `target` itself.
pub(crate) fn dependents_of(cache: &SchemaCache, target: &MetadataObjId) -> Vec<MetadataObjId> {
    let Some(schema_obj) = target.schema_obj_id() else {
        return Vec::new();
    };
    cache
        .dependencies
        .dependent_metadata_objects(&schema_obj)
        .into_keys()
        .filter(|owner| owner != target && !owner.is_descendant_of(target))
        .collect()
}

/// Remove `target` from the document, refusing when other objects depend on
/// it unless `cascade` is set, in which case they are removed too.
///
/// Dependents are looked up in the cache the rebuild starts from, under the
/// writer lock.
pub(crate) async fn drop_object(
    engine: &MetadataEngine,
    target: MetadataObjId,
    cascade: bool,
    reason: BuildReason,
) -> MetadataResult<Value> {
    engine
        .with_new_inconsistent_objs_check_on(
            move |metadata, cache| {
                let dependents = dependents_of(cache, &target);
                if !dependents.is_empty() {
                    if !cascade {
                        let names: Vec<String> = dependents.iter().map(|d| d.to_string()).collect();
                        return Err(MetadataError::dependency(&names));
                    }
                    tracing::info!(
                        object = %target,
                        dependents = dependents.len(),
                        "dropping dependent objects"
                    );
                }
                for dependent in &dependents {
                    metadata.purge(dependent);
                }
                metadata.purge(&target);
                Ok(())
            },
            reason,
        )
        .await?;
    Ok(success())
}
