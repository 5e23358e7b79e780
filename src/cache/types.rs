//! Resolved schema information: what a successful build produces.
//!
//! Everything here is immutable once the build hands it out. Maps keyed by
//! [`TableName`] are never serialised directly; [`SchemaCache::summary`]
//! renders the report shape instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::types::*;
use crate::graphql::document::OperationKind;
use crate::graphql::RootFields;
use crate::inconsistency::InconsistentMetadata;
use crate::metadata::collections::{AllowlistScope, HttpMethod, OpenTelemetryConfig, QueryReference};
use crate::metadata::logical::LogicalModelType;
use crate::metadata::names::*;
use crate::metadata::source::{BackendKind, CustomRootFields, PermType, RelType};
use crate::schema::{
    DependencyGraph, LogicalModelObjId, MetadataObjId, SchemaObjId, SourceObjId, TableObjId,
};

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: ColumnName,
    pub graphql_name: String,
    /// Exposed type: the custom type if one is configured, else the introspected type.
    pub column_type: ScalarType,
    pub is_nullable: bool,
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A resolved relationship.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelInfo {
    pub name: RelName,
    pub rel_type: RelType,
    pub remote_table: TableName,
    /// Local column to remote column.
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
    /// The foreign key the relationship was derived from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ConstraintName>,
}

/// A boolean expression with every column and relationship resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnBoolExp {
    And(Vec<AnnBoolExp>),
    Or(Vec<AnnBoolExp>),
    Not(Box<AnnBoolExp>),
    Exists {
        table: TableName,
        filter: Box<AnnBoolExp>,
    },
    Column {
        column: ColumnName,
        ops: Vec<OpExp>,
    },
    Relationship {
        rel: RelName,
        remote_table: TableName,
        filter: Box<AnnBoolExp>,
    },
    ComputedField {
        name: ComputedFieldName,
        ops: Vec<OpExp>,
    },
}

impl AnnBoolExp {
    pub fn true_() -> Self {
        AnnBoolExp::And(Vec::new())
    }

    pub fn is_true(&self) -> bool {
        matches!(self, AnnBoolExp::And(items) if items.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelPermInfo {
    pub columns: BTreeSet<ColumnName>,
    pub computed_fields: BTreeSet<ComputedFieldName>,
    pub filter: AnnBoolExp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub allow_aggregations: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsPermInfo {
    pub columns: BTreeSet<ColumnName>,
    pub check: AnnBoolExp,
    pub set: BTreeMap<ColumnName, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdPermInfo {
    pub columns: BTreeSet<ColumnName>,
    pub filter: AnnBoolExp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<AnnBoolExp>,
    pub set: BTreeMap<ColumnName, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelPermInfo {
    pub filter: AnnBoolExp,
}

/// All permissions of one role on one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RolePermInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<SelPermInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert: Option<InsPermInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdPermInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<DelPermInfo>,
}

impl RolePermInfo {
    pub fn has(&self, perm_type: PermType) -> bool {
        match perm_type {
            PermType::Select => self.select.is_some(),
            PermType::Insert => self.insert.is_some(),
            PermType::Update => self.update.is_some(),
            PermType::Delete => self.delete.is_some(),
        }
    }

    fn remove(&mut self, perm_type: PermType) {
        match perm_type {
            PermType::Select => self.select = None,
            PermType::Insert => self.insert = None,
            PermType::Update => self.update = None,
            PermType::Delete => self.delete = None,
        }
    }

    fn is_empty(&self) -> bool {
        self.select.is_none() && self.insert.is_none() && self.update.is_none() && self.delete.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: TableName,
    pub graphql_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: BTreeMap<ColumnName, ColumnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKeyMetadata>,
    pub relationships: BTreeMap<RelName, RelInfo>,
    pub computed_fields: BTreeMap<ComputedFieldName, ComputedFieldInfo>,
    pub permissions: BTreeMap<RoleName, RolePermInfo>,
    pub event_triggers: BTreeMap<TriggerName, EventTriggerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<EnumValues>,
    pub custom_root_fields: CustomRootFields,
}

impl TableInfo {
    pub fn column(&self, name: &ColumnName) -> Option<&ColumnInfo> {
        self.columns.get(name)
    }

    pub fn has_foreign_key(&self, constraint: &ConstraintName) -> bool {
        self.foreign_keys.iter().any(|fk| &fk.constraint == constraint)
    }

    pub fn permission(&self, role: &RoleName, perm_type: PermType) -> bool {
        self.permissions
            .get(role)
            .map(|p| p.has(perm_type))
            .unwrap_or(false)
    }

    fn remove_permission(&mut self, role: &RoleName, perm_type: PermType) {
        if let Some(perms) = self.permissions.get_mut(role) {
            perms.remove(perm_type);
            if perms.is_empty() {
                self.permissions.remove(role);
            }
        }
    }
}

// ============================================================================
// Logical models and native queries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalModelPermInfo {
    pub columns: BTreeSet<ColumnName>,
    pub filter: AnnBoolExp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalModelInfo {
    pub name: LogicalModelName,
    pub fields: BTreeMap<ColumnName, LogicalModelType>,
    pub permissions: BTreeMap<RoleName, LogicalModelPermInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeQueryInfo {
    pub root_field_name: NativeQueryName,
    pub code: String,
    pub returns: LogicalModelName,
    pub arguments: BTreeMap<String, ScalarType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub name: SourceName,
    pub kind: BackendKind,
    pub config: ResolvedSourceConfig,
    pub tables: BTreeMap<TableName, TableInfo>,
    pub functions: BTreeMap<FunctionName, FunctionInfo>,
    pub logical_models: BTreeMap<LogicalModelName, LogicalModelInfo>,
    pub native_queries: BTreeMap<NativeQueryName, NativeQueryInfo>,
}

impl SourceInfo {
    pub fn new(name: SourceName, config: ResolvedSourceConfig) -> Self {
        Self {
            name,
            kind: config.kind.clone(),
            config,
            tables: BTreeMap::new(),
            functions: BTreeMap::new(),
            logical_models: BTreeMap::new(),
            native_queries: BTreeMap::new(),
        }
    }

    pub fn table(&self, name: &TableName) -> Option<&TableInfo> {
        self.tables.get(name)
    }
}

// ============================================================================
// Remote schemas, collections, endpoints
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteSchemaPermInfo {
    pub query_root: BTreeSet<String>,
    pub mutation_root: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteSchemaInfo {
    pub name: RemoteSchemaName,
    pub url: String,
    pub introspection: RemoteIntrospection,
    pub permissions: BTreeMap<RoleName, RemoteSchemaPermInfo>,
}

/// A saved query that type-checked against the root fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedQuery {
    pub name: QueryName,
    pub query: String,
    pub operations: Vec<AnalyzedOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedOperation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: OperationKind,
    pub root_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: CollectionName,
    pub queries: BTreeMap<QueryName, AnalyzedQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointInfo {
    pub name: EndpointName,
    pub url: String,
    pub methods: Vec<HttpMethod>,
    pub query: QueryReference,
    pub operation: OperationKind,
}

// ============================================================================
// The cache
// ============================================================================

/// Borrowed view of whatever a [`SchemaObjId`] resolves to.
#[derive(Debug, Clone, Copy)]
pub enum SchemaObjInfo<'a> {
    Source(&'a SourceInfo),
    Table(&'a TableInfo),
    Column(&'a ColumnInfo),
    ForeignKey(&'a ForeignKeyMetadata),
    Relationship(&'a RelInfo),
    ComputedField(&'a ComputedFieldInfo),
    Permission(&'a RolePermInfo, PermType),
    EventTrigger(&'a EventTriggerInfo),
    Function(&'a FunctionInfo),
    LogicalModel(&'a LogicalModelInfo),
    LogicalModelField(&'a LogicalModelType),
    LogicalModelPermission(&'a LogicalModelPermInfo),
    NativeQuery(&'a NativeQueryInfo),
    RemoteSchema(&'a RemoteSchemaInfo),
    RemoteSchemaPermission(&'a RemoteSchemaPermInfo),
    QueryCollection(&'a CollectionInfo),
    Query(&'a AnalyzedQuery),
    Allowlist(&'a AllowlistScope),
    Endpoint(&'a EndpointInfo),
    DataConnector(&'a AgentInfo),
}

/// The resolved, internally consistent schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    pub sources: BTreeMap<SourceName, SourceInfo>,
    pub remote_schemas: BTreeMap<RemoteSchemaName, RemoteSchemaInfo>,
    pub query_collections: BTreeMap<CollectionName, CollectionInfo>,
    pub allowlist: BTreeMap<CollectionName, AllowlistScope>,
    pub endpoints: BTreeMap<EndpointName, EndpointInfo>,
    pub data_connectors: BTreeMap<DataConnectorName, AgentInfo>,
    pub opentelemetry: Option<OpenTelemetryConfig>,
    pub root_fields: RootFields,
    pub dependencies: DependencyGraph,
    pub inconsistent_objects: Vec<InconsistentMetadata>,
    pub metadata_resource_version: u64,
}

impl SchemaCache {
    pub fn source(&self, name: &SourceName) -> Option<&SourceInfo> {
        self.sources.get(name)
    }

    pub fn table(&self, source: &SourceName, table: &TableName) -> Option<&TableInfo> {
        self.sources.get(source)?.tables.get(table)
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistent_objects.is_empty()
    }

    /// Resolve a schema object id against the cache.
    pub fn lookup(&self, id: &SchemaObjId) -> Option<SchemaObjInfo<'_>> {
        match id {
            SchemaObjId::Source { source } => self.sources.get(source).map(SchemaObjInfo::Source),
            SchemaObjId::SourceObj { source, object } => {
                let source = self.sources.get(source)?;
                lookup_source_obj(source, object)
            }
            SchemaObjId::RemoteSchema { name } => {
                self.remote_schemas.get(name).map(SchemaObjInfo::RemoteSchema)
            }
            SchemaObjId::RemoteSchemaPermission { name, role } => self
                .remote_schemas
                .get(name)?
                .permissions
                .get(role)
                .map(SchemaObjInfo::RemoteSchemaPermission),
            SchemaObjId::QueryCollection { name } => self
                .query_collections
                .get(name)
                .map(SchemaObjInfo::QueryCollection),
            SchemaObjId::Query { collection, query } => self
                .query_collections
                .get(collection)?
                .queries
                .get(query)
                .map(SchemaObjInfo::Query),
            SchemaObjId::Allowlist { collection } => {
                self.allowlist.get(collection).map(SchemaObjInfo::Allowlist)
            }
            SchemaObjId::Endpoint { name } => self.endpoints.get(name).map(SchemaObjInfo::Endpoint),
            SchemaObjId::DataConnector { name } => {
                self.data_connectors.get(name).map(SchemaObjInfo::DataConnector)
            }
        }
    }

    pub fn contains(&self, id: &SchemaObjId) -> bool {
        self.lookup(id).is_some()
    }

    /// Drop the resolved counterpart of a metadata object, and everything
    /// nested in it. Used when a later stage invalidates an earlier result.
    pub fn remove_object(&mut self, id: &MetadataObjId) {
        use crate::schema::{LogicalModelMetadataObjId, SourceMetadataObjId, TableMetadataObjId};

        match id {
            MetadataObjId::Source { source } => {
                self.sources.remove(source);
            }
            MetadataObjId::SourceObj { source, object } => {
                let Some(source) = self.sources.get_mut(source) else {
                    return;
                };
                match object {
                    SourceMetadataObjId::Table { table } => {
                        source.tables.remove(table);
                    }
                    SourceMetadataObjId::Function { function } => {
                        source.functions.remove(function);
                    }
                    SourceMetadataObjId::LogicalModel { name } => {
                        source.logical_models.remove(name);
                    }
                    SourceMetadataObjId::NativeQuery { name } => {
                        source.native_queries.remove(name);
                    }
                    SourceMetadataObjId::TableObj { table, object } => {
                        let Some(table) = source.tables.get_mut(table) else {
                            return;
                        };
                        match object {
                            TableMetadataObjId::Relationship { name, .. } => {
                                table.relationships.remove(name);
                            }
                            TableMetadataObjId::ComputedField { name } => {
                                table.computed_fields.remove(name);
                            }
                            TableMetadataObjId::Permission { role, perm_type } => {
                                table.remove_permission(role, *perm_type);
                            }
                            TableMetadataObjId::EventTrigger { name } => {
                                table.event_triggers.remove(name);
                            }
                        }
                    }
                    SourceMetadataObjId::LogicalModelObj { name, object } => {
                        let Some(model) = source.logical_models.get_mut(name) else {
                            return;
                        };
                        match object {
                            LogicalModelMetadataObjId::Permission { role } => {
                                model.permissions.remove(role);
                            }
                        }
                    }
                }
            }
            MetadataObjId::RemoteSchema { name } => {
                self.remote_schemas.remove(name);
            }
            MetadataObjId::RemoteSchemaPermission { name, role } => {
                if let Some(remote) = self.remote_schemas.get_mut(name) {
                    remote.permissions.remove(role);
                }
            }
            MetadataObjId::QueryCollection { name } => {
                self.query_collections.remove(name);
            }
            MetadataObjId::Query { collection, query } => {
                if let Some(c) = self.query_collections.get_mut(collection) {
                    c.queries.remove(query);
                }
            }
            MetadataObjId::Allowlist { collection } => {
                self.allowlist.remove(collection);
            }
            MetadataObjId::Endpoint { name } => {
                self.endpoints.remove(name);
            }
            MetadataObjId::DataConnector { name } => {
                self.data_connectors.remove(name);
            }
            MetadataObjId::OpenTelemetry => self.opentelemetry = None,
        }
    }

    /// Counts of resolved objects, for the CLI and logs.
    pub fn summary(&self) -> Value {
        let sources: Vec<Value> = self
            .sources
            .values()
            .map(|s| {
                json!({
                    "name": s.name,
                    "kind": s.kind,
                    "tables": s.tables.keys().map(|t| t.to_string()).collect::<Vec<_>>(),
                    "functions": s.functions.keys().map(|f| f.to_string()).collect::<Vec<_>>(),
                    "logical_models": s.logical_models.keys().collect::<Vec<_>>(),
                    "native_queries": s.native_queries.keys().collect::<Vec<_>>(),
                    "relationships": s.tables.values().map(|t| t.relationships.len()).sum::<usize>(),
                    "permissions": s.tables.values().map(|t| t.permissions.len()).sum::<usize>(),
                })
            })
            .collect();

        json!({
            "resource_version": self.metadata_resource_version,
            "sources": sources,
            "remote_schemas": self.remote_schemas.keys().collect::<Vec<_>>(),
            "query_collections": self.query_collections.keys().collect::<Vec<_>>(),
            "rest_endpoints": self.endpoints.keys().collect::<Vec<_>>(),
            "data_connectors": self.data_connectors.keys().collect::<Vec<_>>(),
            "query_root_fields": self.root_fields.query.len(),
            "mutation_root_fields": self.root_fields.mutation.len(),
            "dependencies": self.dependencies.edge_count(),
            "inconsistent_objects": self.inconsistent_objects.len(),
        })
    }
}

fn lookup_source_obj<'a>(source: &'a SourceInfo, object: &SourceObjId) -> Option<SchemaObjInfo<'a>> {
    match object {
        SourceObjId::Table { table } => source.tables.get(table).map(SchemaObjInfo::Table),
        SourceObjId::Function { function } => {
            source.functions.get(function).map(SchemaObjInfo::Function)
        }
        SourceObjId::LogicalModel { name } => {
            source.logical_models.get(name).map(SchemaObjInfo::LogicalModel)
        }
        SourceObjId::NativeQuery { name } => {
            source.native_queries.get(name).map(SchemaObjInfo::NativeQuery)
        }
        SourceObjId::TableObj { table, object } => {
            let table = source.tables.get(table)?;
            match object {
                TableObjId::Column { column } => table.columns.get(column).map(SchemaObjInfo::Column),
                TableObjId::ForeignKey { constraint } => table
                    .foreign_keys
                    .iter()
                    .find(|fk| &fk.constraint == constraint)
                    .map(SchemaObjInfo::ForeignKey),
                TableObjId::Relationship { name } => {
                    table.relationships.get(name).map(SchemaObjInfo::Relationship)
                }
                TableObjId::ComputedField { name } => {
                    table.computed_fields.get(name).map(SchemaObjInfo::ComputedField)
                }
                TableObjId::Permission { role, perm_type } => table
                    .permissions
                    .get(role)
                    .filter(|p| p.has(*perm_type))
                    .map(|p| SchemaObjInfo::Permission(p, *perm_type)),
                TableObjId::EventTrigger { name } => {
                    table.event_triggers.get(name).map(SchemaObjInfo::EventTrigger)
                }
            }
        }
        SourceObjId::LogicalModelObj { name, object } => {
            let model = source.logical_models.get(name)?;
            match object {
                LogicalModelObjId::Field { name } => {
                    model.fields.get(name).map(SchemaObjInfo::LogicalModelField)
                }
                LogicalModelObjId::Permission { role } => model
                    .permissions
                    .get(role)
                    .map(SchemaObjInfo::LogicalModelPermission),
            }
        }
    }
}
