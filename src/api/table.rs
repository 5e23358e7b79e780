//! Tables and the objects attached to them: relationships, permissions,
//! computed fields and event triggers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::source::source_mut;
use super::{default_source, drop_object, no_database_changes, success};
use crate::cache::BuildReason;
use crate::engine::{MetadataEngine, MetadataError, MetadataResult};
use crate::metadata::names::*;
use crate::metadata::{
    ArrRelUsing, ComputedFieldDefinition, ComputedFieldMetadata, DeletePermission, EventTriggerConf,
    InsertPermission, Metadata, ObjRelUsing, PermDef, PermType, RelDef, RelType, SelectPermission,
    TableConfig, TableMetadata, UpdatePermission,
};
use crate::schema::{MetadataObjId, TableMetadataObjId};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTable {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    #[serde(default)]
    pub is_enum: bool,
    #[serde(default)]
    pub configuration: TableConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntrackTable {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTableCustomization {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub configuration: TableConfig,
}

/// Arguments of `create_object_relationship` and `create_array_relationship`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRelationship<U> {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub name: RelName,
    pub using: U,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

pub type CreateObjectRelationship = CreateRelationship<ObjRelUsing>;
pub type CreateArrayRelationship = CreateRelationship<ArrRelUsing>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRelationship {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub relationship: RelName,
    #[serde(default)]
    pub cascade: bool,
}

/// Arguments of the `create_*_permission` commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePermission<P> {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub role: RoleName,
    pub permission: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

pub type CreateSelectPermission = CreatePermission<SelectPermission>;
pub type CreateInsertPermission = CreatePermission<InsertPermission>;
pub type CreateUpdatePermission = CreatePermission<UpdatePermission>;
pub type CreateDeletePermission = CreatePermission<DeletePermission>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropPermission {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub role: RoleName,
    #[serde(rename = "type")]
    pub perm_type: PermType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddComputedField {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub name: ComputedFieldName,
    pub definition: ComputedFieldDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropComputedField {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    pub name: ComputedFieldName,
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEventTrigger {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub table: TableName,
    #[serde(flatten)]
    pub trigger: EventTriggerConf,
    /// Replace an existing trigger of the same name.
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteEventTrigger {
    #[serde(default = "default_source")]
    pub source: SourceName,
    pub name: TriggerName,
}

// ============================================================================
// Helpers
// ============================================================================

fn table_mut<'m>(
    metadata: &'m mut Metadata,
    source: &SourceName,
    table: &TableName,
) -> MetadataResult<&'m mut TableMetadata> {
    source_mut(metadata, source)?
        .table_mut(table)
        .ok_or_else(|| MetadataError::not_exists(format!("table \"{}\" does not exist in source \"{}\"", table, source)))
}

fn ensure_table(engine: &MetadataEngine, source: &SourceName, table: &TableName) -> MetadataResult<TableMetadata> {
    let metadata = engine.metadata();
    let Some(src) = metadata.source(source) else {
        return Err(MetadataError::not_exists(format!("source with name \"{}\" does not exist", source)));
    };
    src.table(table)
        .cloned()
        .ok_or_else(|| MetadataError::not_exists(format!("table \"{}\" does not exist in source \"{}\"", table, source)))
}

/// A new table field name must not shadow a column-level name already taken
/// by a relationship or computed field.
fn ensure_field_free(table: &TableMetadata, name: &str) -> MetadataResult<()> {
    let taken = table.relationship_names().any(|r| r.as_str() == name)
        || table.computed_fields.iter().any(|c| c.name.as_str() == name);
    if taken {
        Err(MetadataError::already_exists(format!(
            "field with name \"{}\" already exists in table \"{}\"",
            name, table.table
        )))
    } else {
        Ok(())
    }
}

/// Permission definitions of one kind on a table.
pub trait TablePermission: Sized {
    const PERM_TYPE: PermType;
    fn permissions(table: &mut TableMetadata) -> &mut Vec<PermDef<Self>>;
}

impl TablePermission for SelectPermission {
    const PERM_TYPE: PermType = PermType::Select;
    fn permissions(table: &mut TableMetadata) -> &mut Vec<PermDef<Self>> {
        &mut table.select_permissions
    }
}

impl TablePermission for InsertPermission {
    const PERM_TYPE: PermType = PermType::Insert;
    fn permissions(table: &mut TableMetadata) -> &mut Vec<PermDef<Self>> {
        &mut table.insert_permissions
    }
}

impl TablePermission for UpdatePermission {
    const PERM_TYPE: PermType = PermType::Update;
    fn permissions(table: &mut TableMetadata) -> &mut Vec<PermDef<Self>> {
        &mut table.update_permissions
    }
}

impl TablePermission for DeletePermission {
    const PERM_TYPE: PermType = PermType::Delete;
    fn permissions(table: &mut TableMetadata) -> &mut Vec<PermDef<Self>> {
        &mut table.delete_permissions
    }
}

// ============================================================================
// Tables
// ============================================================================

pub(crate) async fn track_table(engine: &MetadataEngine, args: TrackTable) -> MetadataResult<Value> {
    let target = MetadataObjId::table(&args.source, &args.table);
    let reason = BuildReason::update_source(&args.source);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let source = source_mut(metadata, &args.source)?;
                if source.table(&args.table).is_some() {
                    return Err(MetadataError::already_exists(format!(
                        "view/table already tracked: {}",
                        args.table
                    )));
                }
                let mut table = TableMetadata::new(args.table);
                table.is_enum = args.is_enum;
                table.configuration = args.configuration;
                source.tables.push(table);
                Ok(())
            },
            reason,
        )
        .await?;
    Ok(success())
}

pub(crate) async fn untrack_table(engine: &MetadataEngine, args: UntrackTable) -> MetadataResult<Value> {
    ensure_table(engine, &args.source, &args.table)?;
    let target = MetadataObjId::table(&args.source, &args.table);
    drop_object(engine, target, args.cascade, no_database_changes()).await
}

pub(crate) async fn set_table_customization(
    engine: &MetadataEngine,
    args: SetTableCustomization,
) -> MetadataResult<Value> {
    let target = MetadataObjId::table(&args.source, &args.table);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                table_mut(metadata, &args.source, &args.table)?.configuration = args.configuration;
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

// ============================================================================
// Relationships
// ============================================================================

pub(crate) async fn create_object_relationship(
    engine: &MetadataEngine,
    args: CreateObjectRelationship,
) -> MetadataResult<Value> {
    let target = MetadataObjId::relationship(&args.source, &args.table, &args.name, RelType::Object);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let table = table_mut(metadata, &args.source, &args.table)?;
                ensure_field_free(table, args.name.as_str())?;
                table.object_relationships.push(RelDef {
                    name: args.name,
                    using: args.using,
                    comment: args.comment,
                });
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn create_array_relationship(
    engine: &MetadataEngine,
    args: CreateArrayRelationship,
) -> MetadataResult<Value> {
    let target = MetadataObjId::relationship(&args.source, &args.table, &args.name, RelType::Array);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let table = table_mut(metadata, &args.source, &args.table)?;
                ensure_field_free(table, args.name.as_str())?;
                table.array_relationships.push(RelDef {
                    name: args.name,
                    using: args.using,
                    comment: args.comment,
                });
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn drop_relationship(engine: &MetadataEngine, args: DropRelationship) -> MetadataResult<Value> {
    let table = ensure_table(engine, &args.source, &args.table)?;
    let rel_type = if table.object_relationships.iter().any(|r| r.name == args.relationship) {
        RelType::Object
    } else if table.array_relationships.iter().any(|r| r.name == args.relationship) {
        RelType::Array
    } else {
        return Err(MetadataError::not_exists(format!(
            "relationship \"{}\" does not exist in table \"{}\"",
            args.relationship, args.table
        )));
    };

    let target = MetadataObjId::relationship(&args.source, &args.table, &args.relationship, rel_type);
    drop_object(engine, target, args.cascade, no_database_changes()).await
}

// ============================================================================
// Permissions
// ============================================================================

pub(crate) async fn create_permission<P>(
    engine: &MetadataEngine,
    args: CreatePermission<P>,
) -> MetadataResult<Value>
where
    P: TablePermission,
{
    let target = MetadataObjId::permission(&args.source, &args.table, &args.role, P::PERM_TYPE);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let table = table_mut(metadata, &args.source, &args.table)?;
                if table.has_permission(&args.role, P::PERM_TYPE) {
                    return Err(MetadataError::already_exists(format!(
                        "{} permission already defined on table \"{}\" with role \"{}\"",
                        P::PERM_TYPE,
                        args.table,
                        args.role
                    )));
                }
                P::permissions(table).push(PermDef {
                    role: args.role,
                    permission: args.permission,
                    comment: args.comment,
                });
                Ok(())
            },
            no_database_changes(),
        )
        .await?;
    Ok(success())
}

pub(crate) async fn drop_permission(engine: &MetadataEngine, args: DropPermission) -> MetadataResult<Value> {
    let table = ensure_table(engine, &args.source, &args.table)?;
    if !table.has_permission(&args.role, args.perm_type) {
        return Err(MetadataError::not_exists(format!(
            "{} permission on table \"{}\" for role \"{}\" does not exist",
            args.perm_type, args.table, args.role
        )));
    }

    let target = MetadataObjId::permission(&args.source, &args.table, &args.role, args.perm_type);
    drop_object(engine, target, false, no_database_changes()).await
}

// ============================================================================
// Computed fields
// ============================================================================

pub(crate) async fn add_computed_field(engine: &MetadataEngine, args: AddComputedField) -> MetadataResult<Value> {
    let target = MetadataObjId::table_obj(
        &args.source,
        &args.table,
        TableMetadataObjId::ComputedField {
            name: args.name.clone(),
        },
    );
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let table = table_mut(metadata, &args.source, &args.table)?;
                ensure_field_free(table, args.name.as_str())?;
                table.computed_fields.push(ComputedFieldMetadata {
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

pub(crate) async fn drop_computed_field(engine: &MetadataEngine, args: DropComputedField) -> MetadataResult<Value> {
    let table = ensure_table(engine, &args.source, &args.table)?;
    if !table.computed_fields.iter().any(|c| c.name == args.name) {
        return Err(MetadataError::not_exists(format!(
            "computed field \"{}\" does not exist in table \"{}\"",
            args.name, args.table
        )));
    }

    let target = MetadataObjId::table_obj(
        &args.source,
        &args.table,
        TableMetadataObjId::ComputedField { name: args.name },
    );
    drop_object(engine, target, args.cascade, no_database_changes()).await
}

// ============================================================================
// Event triggers
// ============================================================================

pub(crate) async fn create_event_trigger(engine: &MetadataEngine, args: CreateEventTrigger) -> MetadataResult<Value> {
    let target = MetadataObjId::table_obj(
        &args.source,
        &args.table,
        TableMetadataObjId::EventTrigger {
            name: args.trigger.name.clone(),
        },
    );
    let reason = BuildReason::update_source(&args.source);
    engine
        .build_schema_cache_for(
            &target,
            move |metadata| {
                let source = source_mut(metadata, &args.source)?;
                let elsewhere = source
                    .tables
                    .iter()
                    .any(|t| t.table != args.table && t.event_triggers.iter().any(|e| e.name == args.trigger.name));
                if elsewhere {
                    return Err(MetadataError::already_exists(format!(
                        "event trigger \"{}\" is already defined on another table",
                        args.trigger.name
                    )));
                }

                let table = table_mut(metadata, &args.source, &args.table)?;
                let existing = table.event_triggers.iter().position(|e| e.name == args.trigger.name);
                match (existing, args.replace) {
                    (Some(i), true) => table.event_triggers[i] = args.trigger,
                    (Some(_), false) => {
                        return Err(MetadataError::already_exists(format!(
                            "event trigger with name \"{}\" already exists",
                            args.trigger.name
                        )))
                    }
                    (None, _) => table.event_triggers.push(args.trigger),
                }
                Ok(())
            },
            reason,
        )
        .await?;
    Ok(success())
}

pub(crate) async fn delete_event_trigger(engine: &MetadataEngine, args: DeleteEventTrigger) -> MetadataResult<Value> {
    let metadata = engine.metadata();
    let table = metadata.source(&args.source).and_then(|s| {
        s.tables
            .iter()
            .find(|t| t.event_triggers.iter().any(|e| e.name == args.name))
            .map(|t| t.table.clone())
    });
    let Some(table) = table else {
        return Err(MetadataError::not_exists(format!(
            "event trigger with name \"{}\" does not exist",
            args.name
        )));
    };

    let target = MetadataObjId::table_obj(&args.source, &table, TableMetadataObjId::EventTrigger { name: args.name });
    drop_object(engine, target, false, no_database_changes()).await
}
