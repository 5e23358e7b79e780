//! Identities of metadata objects and of resolved schema objects.
//!
//! A [`MetadataObjId`] names one unit of the metadata document that can be
//! reported as inconsistent or dropped on its own. A [`SchemaObjId`] names an
//! entity of the resolved schema at finer granularity (individual columns and
//! constraints included) and is what dependency edges point at.

use std::fmt;

use serde::Serialize;

use crate::metadata::names::*;
use crate::metadata::source::{PermType, RelType};

// ============================================================================
// Metadata object identity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableMetadataObjId {
    Relationship { name: RelName, rel_type: RelType },
    ComputedField { name: ComputedFieldName },
    Permission { role: RoleName, perm_type: PermType },
    EventTrigger { name: TriggerName },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalModelMetadataObjId {
    Permission { role: RoleName },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceMetadataObjId {
    Table { table: TableName },
    Function { function: FunctionName },
    LogicalModel { name: LogicalModelName },
    NativeQuery { name: NativeQueryName },
    TableObj { table: TableName, object: TableMetadataObjId },
    LogicalModelObj { name: LogicalModelName, object: LogicalModelMetadataObjId },
}

/// Stable identity of a trackable unit of the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataObjId {
    Source { source: SourceName },
    SourceObj { source: SourceName, object: SourceMetadataObjId },
    RemoteSchema { name: RemoteSchemaName },
    RemoteSchemaPermission { name: RemoteSchemaName, role: RoleName },
    QueryCollection { name: CollectionName },
    Query { collection: CollectionName, query: QueryName },
    Allowlist { collection: CollectionName },
    Endpoint { name: EndpointName },
    DataConnector { name: DataConnectorName },
    OpenTelemetry,
}

impl MetadataObjId {
    pub fn source(source: &SourceName) -> Self {
        MetadataObjId::Source {
            source: source.clone(),
        }
    }

    pub fn table(source: &SourceName, table: &TableName) -> Self {
        MetadataObjId::SourceObj {
            source: source.clone(),
            object: SourceMetadataObjId::Table {
                table: table.clone(),
            },
        }
    }

    pub fn table_obj(source: &SourceName, table: &TableName, object: TableMetadataObjId) -> Self {
        MetadataObjId::SourceObj {
            source: source.clone(),
            object: SourceMetadataObjId::TableObj {
                table: table.clone(),
                object,
            },
        }
    }

    pub fn relationship(
        source: &SourceName,
        table: &TableName,
        name: &RelName,
        rel_type: RelType,
    ) -> Self {
        Self::table_obj(
            source,
            table,
            TableMetadataObjId::Relationship {
                name: name.clone(),
                rel_type,
            },
        )
    }

    pub fn permission(
        source: &SourceName,
        table: &TableName,
        role: &RoleName,
        perm_type: PermType,
    ) -> Self {
        Self::table_obj(
            source,
            table,
            TableMetadataObjId::Permission {
                role: role.clone(),
                perm_type,
            },
        )
    }

    pub fn function(source: &SourceName, function: &FunctionName) -> Self {
        MetadataObjId::SourceObj {
            source: source.clone(),
            object: SourceMetadataObjId::Function {
                function: function.clone(),
            },
        }
    }

    pub fn logical_model(source: &SourceName, name: &LogicalModelName) -> Self {
        MetadataObjId::SourceObj {
            source: source.clone(),
            object: SourceMetadataObjId::LogicalModel { name: name.clone() },
        }
    }

    pub fn native_query(source: &SourceName, name: &NativeQueryName) -> Self {
        MetadataObjId::SourceObj {
            source: source.clone(),
            object: SourceMetadataObjId::NativeQuery { name: name.clone() },
        }
    }

    pub fn remote_schema(name: &RemoteSchemaName) -> Self {
        MetadataObjId::RemoteSchema { name: name.clone() }
    }

    /// The `type` column of the inconsistency report.
    pub fn object_type(&self) -> &'static str {
        match self {
            MetadataObjId::Source { .. } => "source",
            MetadataObjId::SourceObj { object, .. } => match object {
                SourceMetadataObjId::Table { .. } => "table",
                SourceMetadataObjId::Function { .. } => "function",
                SourceMetadataObjId::LogicalModel { .. } => "logical_model",
                SourceMetadataObjId::NativeQuery { .. } => "native_query",
                SourceMetadataObjId::TableObj { object, .. } => match object {
                    TableMetadataObjId::Relationship { rel_type, .. } => match rel_type {
                        RelType::Object => "object_relation",
                        RelType::Array => "array_relation",
                    },
                    TableMetadataObjId::ComputedField { .. } => "computed_field",
                    TableMetadataObjId::Permission { perm_type, .. } => match perm_type {
                        PermType::Select => "select_permission",
                        PermType::Insert => "insert_permission",
                        PermType::Update => "update_permission",
                        PermType::Delete => "delete_permission",
                    },
                    TableMetadataObjId::EventTrigger { .. } => "event_trigger",
                },
                SourceMetadataObjId::LogicalModelObj { .. } => "logical_model_permission",
            },
            MetadataObjId::RemoteSchema { .. } => "remote_schema",
            MetadataObjId::RemoteSchemaPermission { .. } => "remote_schema_permission",
            MetadataObjId::QueryCollection { .. } => "query_collection",
            MetadataObjId::Query { .. } => "query",
            MetadataObjId::Allowlist { .. } => "allowlist",
            MetadataObjId::Endpoint { .. } => "rest_endpoint",
            MetadataObjId::DataConnector { .. } => "data_connector",
            MetadataObjId::OpenTelemetry => "opentelemetry",
        }
    }

    /// The `name` column of the inconsistency report.
    pub fn name(&self) -> String {
        match self {
            MetadataObjId::Source { source } => source.to_string(),
            MetadataObjId::SourceObj { source, object } => {
                let inner = match object {
                    SourceMetadataObjId::Table { table } => table.to_string(),
                    SourceMetadataObjId::Function { function } => function.to_string(),
                    SourceMetadataObjId::LogicalModel { name } => name.to_string(),
                    SourceMetadataObjId::NativeQuery { name } => name.to_string(),
                    SourceMetadataObjId::TableObj { table, object } => match object {
                        TableMetadataObjId::Relationship { name, .. } => {
                            format!("{} in table {}", name, table)
                        }
                        TableMetadataObjId::ComputedField { name } => {
                            format!("{} in table {}", name, table)
                        }
                        TableMetadataObjId::Permission { role, .. } => {
                            format!("{} in table {}", role, table)
                        }
                        TableMetadataObjId::EventTrigger { name } => {
                            format!("{} in table {}", name, table)
                        }
                    },
                    SourceMetadataObjId::LogicalModelObj { name, object } => match object {
                        LogicalModelMetadataObjId::Permission { role } => {
                            format!("{} in logical model {}", role, name)
                        }
                    },
                };
                format!("{} in source {}", inner, source)
            }
            MetadataObjId::RemoteSchema { name } => name.to_string(),
            MetadataObjId::RemoteSchemaPermission { name, role } => {
                format!("{} in remote schema {}", role, name)
            }
            MetadataObjId::QueryCollection { name } => name.to_string(),
            MetadataObjId::Query { collection, query } => {
                format!("{} in collection {}", query, collection)
            }
            MetadataObjId::Allowlist { collection } => collection.to_string(),
            MetadataObjId::Endpoint { name } => name.to_string(),
            MetadataObjId::DataConnector { name } => name.to_string(),
            MetadataObjId::OpenTelemetry => "opentelemetry".to_string(),
        }
    }

    /// The object this one is nested in, if any.
    pub fn parent(&self) -> Option<MetadataObjId> {
        match self {
            MetadataObjId::SourceObj { source, object } => Some(match object {
                SourceMetadataObjId::TableObj { table, .. } => MetadataObjId::table(source, table),
                SourceMetadataObjId::LogicalModelObj { name, .. } => {
                    MetadataObjId::logical_model(source, name)
                }
                _ => MetadataObjId::source(source),
            }),
            MetadataObjId::RemoteSchemaPermission { name, .. } => {
                Some(MetadataObjId::remote_schema(name))
            }
            MetadataObjId::Query { collection, .. } => Some(MetadataObjId::QueryCollection {
                name: collection.clone(),
            }),
            _ => None,
        }
    }

    /// True when `self` is nested, at any depth, inside `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &MetadataObjId) -> bool {
        let mut current = self.parent();
        while let Some(id) = current {
            if &id == ancestor {
                return true;
            }
            current = id.parent();
        }
        false
    }

    /// The resolved schema object this metadata object produces, if any.
    pub fn schema_obj_id(&self) -> Option<SchemaObjId> {
        match self {
            MetadataObjId::Source { source } => Some(SchemaObjId::Source {
                source: source.clone(),
            }),
            MetadataObjId::SourceObj { source, object } => {
                let object = match object {
                    SourceMetadataObjId::Table { table } => SourceObjId::Table {
                        table: table.clone(),
                    },
                    SourceMetadataObjId::Function { function } => SourceObjId::Function {
                        function: function.clone(),
                    },
                    SourceMetadataObjId::LogicalModel { name } => {
                        SourceObjId::LogicalModel { name: name.clone() }
                    }
                    SourceMetadataObjId::NativeQuery { name } => {
                        SourceObjId::NativeQuery { name: name.clone() }
                    }
                    SourceMetadataObjId::TableObj { table, object } => SourceObjId::TableObj {
                        table: table.clone(),
                        object: match object {
                            TableMetadataObjId::Relationship { name, .. } => {
                                TableObjId::Relationship { name: name.clone() }
                            }
                            TableMetadataObjId::ComputedField { name } => {
                                TableObjId::ComputedField { name: name.clone() }
                            }
                            TableMetadataObjId::Permission { role, perm_type } => {
                                TableObjId::Permission {
                                    role: role.clone(),
                                    perm_type: *perm_type,
                                }
                            }
                            TableMetadataObjId::EventTrigger { name } => {
                                TableObjId::EventTrigger { name: name.clone() }
                            }
                        },
                    },
                    SourceMetadataObjId::LogicalModelObj { name, object } => {
                        SourceObjId::LogicalModelObj {
                            name: name.clone(),
                            object: match object {
                                LogicalModelMetadataObjId::Permission { role } => {
                                    LogicalModelObjId::Permission { role: role.clone() }
                                }
                            },
                        }
                    }
                };
                Some(SchemaObjId::SourceObj {
                    source: source.clone(),
                    object,
                })
            }
            MetadataObjId::RemoteSchema { name } => {
                Some(SchemaObjId::RemoteSchema { name: name.clone() })
            }
            MetadataObjId::RemoteSchemaPermission { name, role } => {
                Some(SchemaObjId::RemoteSchemaPermission {
                    name: name.clone(),
                    role: role.clone(),
                })
            }
            MetadataObjId::QueryCollection { name } => {
                Some(SchemaObjId::QueryCollection { name: name.clone() })
            }
            MetadataObjId::Query { collection, query } => Some(SchemaObjId::Query {
                collection: collection.clone(),
                query: query.clone(),
            }),
            MetadataObjId::Endpoint { name } => Some(SchemaObjId::Endpoint { name: name.clone() }),
            MetadataObjId::DataConnector { name } => {
                Some(SchemaObjId::DataConnector { name: name.clone() })
            }
            MetadataObjId::Allowlist { collection } => Some(SchemaObjId::Allowlist {
                collection: collection.clone(),
            }),
            MetadataObjId::OpenTelemetry => None,
        }
    }
}

impl fmt::Display for MetadataObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.object_type().replace('_', " "), self.name())
    }
}

/// A metadata object together with its JSON definition, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataObject {
    pub id: MetadataObjId,
    pub definition: serde_json::Value,
}

impl MetadataObject {
    pub fn new(id: MetadataObjId, definition: serde_json::Value) -> Self {
        Self { id, definition }
    }

    /// Build from any serialisable definition; a definition that fails to
    /// serialise is reported as `null`.
    pub fn from_def<T: Serialize>(id: MetadataObjId, definition: &T) -> Self {
        Self {
            id,
            definition: serde_json::to_value(definition).unwrap_or(serde_json::Value::Null),
        }
    }
}

// ============================================================================
// Schema object identity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableObjId {
    Column { column: ColumnName },
    ForeignKey { constraint: ConstraintName },
    Relationship { name: RelName },
    ComputedField { name: ComputedFieldName },
    Permission { role: RoleName, perm_type: PermType },
    EventTrigger { name: TriggerName },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalModelObjId {
    Field { name: ColumnName },
    Permission { role: RoleName },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceObjId {
    Table { table: TableName },
    Function { function: FunctionName },
    LogicalModel { name: LogicalModelName },
    NativeQuery { name: NativeQueryName },
    TableObj { table: TableName, object: TableObjId },
    LogicalModelObj { name: LogicalModelName, object: LogicalModelObjId },
}

/// Identity of a resolved schema entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaObjId {
    Source { source: SourceName },
    SourceObj { source: SourceName, object: SourceObjId },
    RemoteSchema { name: RemoteSchemaName },
    RemoteSchemaPermission { name: RemoteSchemaName, role: RoleName },
    QueryCollection { name: CollectionName },
    Query { collection: CollectionName, query: QueryName },
    Allowlist { collection: CollectionName },
    Endpoint { name: EndpointName },
    DataConnector { name: DataConnectorName },
}

impl SchemaObjId {
    pub fn source(source: &SourceName) -> Self {
        SchemaObjId::Source {
            source: source.clone(),
        }
    }

    pub fn table(source: &SourceName, table: &TableName) -> Self {
        SchemaObjId::SourceObj {
            source: source.clone(),
            object: SourceObjId::Table {
                table: table.clone(),
            },
        }
    }

    pub fn table_obj(source: &SourceName, table: &TableName, object: TableObjId) -> Self {
        SchemaObjId::SourceObj {
            source: source.clone(),
            object: SourceObjId::TableObj {
                table: table.clone(),
                object,
            },
        }
    }

    pub fn column(source: &SourceName, table: &TableName, column: &ColumnName) -> Self {
        Self::table_obj(
            source,
            table,
            TableObjId::Column {
                column: column.clone(),
            },
        )
    }

    pub fn foreign_key(source: &SourceName, table: &TableName, constraint: &ConstraintName) -> Self {
        Self::table_obj(
            source,
            table,
            TableObjId::ForeignKey {
                constraint: constraint.clone(),
            },
        )
    }

    pub fn relationship(source: &SourceName, table: &TableName, name: &RelName) -> Self {
        Self::table_obj(source, table, TableObjId::Relationship { name: name.clone() })
    }

    pub fn function(source: &SourceName, function: &FunctionName) -> Self {
        SchemaObjId::SourceObj {
            source: source.clone(),
            object: SourceObjId::Function {
                function: function.clone(),
            },
        }
    }

    pub fn logical_model(source: &SourceName, name: &LogicalModelName) -> Self {
        SchemaObjId::SourceObj {
            source: source.clone(),
            object: SourceObjId::LogicalModel { name: name.clone() },
        }
    }

    pub fn logical_model_field(
        source: &SourceName,
        model: &LogicalModelName,
        field: &ColumnName,
    ) -> Self {
        SchemaObjId::SourceObj {
            source: source.clone(),
            object: SourceObjId::LogicalModelObj {
                name: model.clone(),
                object: LogicalModelObjId::Field { name: field.clone() },
            },
        }
    }

    /// The entity this one is part of, if any.
    pub fn parent(&self) -> Option<SchemaObjId> {
        match self {
            SchemaObjId::SourceObj { source, object } => Some(match object {
                SourceObjId::TableObj { table, .. } => SchemaObjId::table(source, table),
                SourceObjId::LogicalModelObj { name, .. } => {
                    SchemaObjId::logical_model(source, name)
                }
                _ => SchemaObjId::source(source),
            }),
            SchemaObjId::RemoteSchemaPermission { name, .. } => {
                Some(SchemaObjId::RemoteSchema { name: name.clone() })
            }
            SchemaObjId::Query { collection, .. } => Some(SchemaObjId::QueryCollection {
                name: collection.clone(),
            }),
            _ => None,
        }
    }

    /// True when `self` is part of `ancestor`, at any depth.
    pub fn is_descendant_of(&self, ancestor: &SchemaObjId) -> bool {
        let mut current = self.parent();
        while let Some(id) = current {
            if &id == ancestor {
                return true;
            }
            current = id.parent();
        }
        false
    }

    /// `self` or any of its ancestors equals `other`.
    pub fn is_within(&self, other: &SchemaObjId) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// Human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            SchemaObjId::Source { source } => format!("source {}", source),
            SchemaObjId::SourceObj { source, object } => {
                let inner = match object {
                    SourceObjId::Table { table } => format!("table {}", table),
                    SourceObjId::Function { function } => format!("function {}", function),
                    SourceObjId::LogicalModel { name } => format!("logical model {}", name),
                    SourceObjId::NativeQuery { name } => format!("native query {}", name),
                    SourceObjId::TableObj { table, object } => match object {
                        TableObjId::Column { column } => format!("column {}.{}", table, column),
                        TableObjId::ForeignKey { constraint } => {
                            format!("constraint {} on table {}", constraint, table)
                        }
                        TableObjId::Relationship { name } => {
                            format!("relationship {}.{}", table, name)
                        }
                        TableObjId::ComputedField { name } => {
                            format!("computed field {}.{}", table, name)
                        }
                        TableObjId::Permission { role, perm_type } => {
                            format!("permission {}.{}.{}", table, role, perm_type)
                        }
                        TableObjId::EventTrigger { name } => {
                            format!("event trigger {} on table {}", name, table)
                        }
                    },
                    SourceObjId::LogicalModelObj { name, object } => match object {
                        LogicalModelObjId::Field { name: field } => {
                            format!("field {}.{}", name, field)
                        }
                        LogicalModelObjId::Permission { role } => {
                            format!("permission {}.{}", name, role)
                        }
                    },
                };
                format!("{} in source {}", inner, source)
            }
            SchemaObjId::RemoteSchema { name } => format!("remote schema {}", name),
            SchemaObjId::RemoteSchemaPermission { name, role } => {
                format!("permission for role {} on remote schema {}", role, name)
            }
            SchemaObjId::QueryCollection { name } => format!("query collection {}", name),
            SchemaObjId::Query { collection, query } => {
                format!("query {} in collection {}", query, collection)
            }
            SchemaObjId::Allowlist { collection } => {
                format!("allowlist entry for collection {}", collection)
            }
            SchemaObjId::Endpoint { name } => format!("rest endpoint {}", name),
            SchemaObjId::DataConnector { name } => format!("data connector {}", name),
        }
    }
}

impl fmt::Display for SchemaObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
