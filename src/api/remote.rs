//! Remote schemas and their role permissions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{drop_object, no_database_changes, success};
use crate::engine::{MetadataEngine, MetadataError, MetadataResult};
use crate::metadata::names::*;
use crate::metadata::{
    RemoteSchemaDef, RemoteSchemaMetadata, RemoteSchemaPermissionDef, RemoteSchemaPermissionMetadata,
};
use crate::schema::MetadataObjId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRemoteSchema {
    pub name: RemoteSchemaName,
    pub definition: RemoteSchemaDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveRemoteSchema {
    pub name: RemoteSchemaName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRemoteSchemaPermissions {
    pub remote_schema: RemoteSchemaName,
    pub role: RoleName,
    pub definition: RemoteSchemaPermissionDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRemoteSchemaPermissions {
    pub remote_schema: RemoteSchemaName,
    pub role: RoleName,
}

pub(crate) async fn add_remote_schema(engine: &MetadataEngine, args: AddRemoteSchema) -> MetadataResult<Value> {
    let target = MetadataObjId::remote_schema(&args.name);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                if metadata.remote_schema(&args.name).is_some() {
                    return Err(MetadataError::already_exists(format!(
                        "remote schema with name \"{}\" already exists",
                        args.name
                    )));
                }
                metadata.remote_schemas.push(RemoteSchemaMetadata {
                    name: args.name,
                    definition: args.definition,
                    permissions: Vec::new(),
                    comment: args.comment,
                });
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn remove_remote_schema(engine: &MetadataEngine, args: RemoveRemoteSchema) -> MetadataResult<Value> {
    if engine.metadata().remote_schema(&args.name).is_none() {
        return Err(MetadataError::not_exists(format!(
            "remote schema with name \"{}\" does not exist",
            args.name
        )));
    }
    let target = MetadataObjId::remote_schema(&args.name);
    drop_object(engine, target, false, no_database_changes()).await
}

pub(crate) async fn add_remote_schema_permissions(
    engine: &MetadataEngine,
    args: AddRemoteSchemaPermissions,
) -> MetadataResult<Value> {
    if !engine.cache_ref().app_context().features.remote_schema_permissions {
        return Err(MetadataError::invalid(
            "remote schema permissions can only be added when the feature is enabled",
        ));
    }

    let target = MetadataObjId::RemoteSchemaPermission {
        name: args.remote_schema.clone(),
        role: args.role.clone(),
    };
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let Some(remote) = metadata.remote_schema_mut(&args.remote_schema) else {
                    return Err(MetadataError::not_exists(format!(
                        "remote schema \"{}\" does not exist",
                        args.remote_schema
                    )));
                };
                if remote.permissions.iter().any(|p| p.role == args.role) {
                    return Err(MetadataError::already_exists(format!(
                        "permissions for role \"{}\" for remote schema \"{}\" already exist",
                        args.role, args.remote_schema
                    )));
                }
                remote.permissions.push(RemoteSchemaPermissionMetadata {
                    role: args.role,
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

pub(crate) async fn drop_remote_schema_permissions(
    engine: &MetadataEngine,
    args: DropRemoteSchemaPermissions,
) -> MetadataResult<Value> {
    let exists = engine
        .metadata()
        .remote_schema(&args.remote_schema)
        .map(|r| r.permissions.iter().any(|p| p.role == args.role))
        .unwrap_or(false);
    if !exists {
        return Err(MetadataError::not_exists(format!(
            "permissions for role \"{}\" for remote schema \"{}\" do not exist",
            args.role, args.remote_schema
        )));
    }

    let target = MetadataObjId::RemoteSchemaPermission {
        name: args.remote_schema,
        role: args.role,
    };
    drop_object(engine, target, false, no_database_changes()).await
}

