//! Data exchanged with backend adapters: raw introspection results going in,
//! resolved per-object information coming out.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::metadata::names::*;
use crate::metadata::source::{BackendKind, FunctionExposedAs, RetryConf, TriggerOpsDef};

// ============================================================================
// Introspection
// ============================================================================

/// Everything an adapter reports about the objects in one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    #[serde(default)]
    pub tables: Vec<DbTableMetadata>,
    #[serde(default)]
    pub functions: Vec<DbFunctionMetadata>,
    /// Scalar types known to the database, in addition to the column types in use.
    #[serde(default)]
    pub scalars: BTreeSet<ScalarType>,
}

impl DatabaseMetadata {
    pub fn table(&self, name: &TableName) -> Option<&DbTableMetadata> {
        self.tables.iter().find(|t| &t.name == name)
    }

    pub fn function(&self, name: &FunctionName) -> Option<&DbFunctionMetadata> {
        self.functions.iter().find(|f| &f.name == name)
    }

    /// Whether `scalar` names a type this database understands.
    pub fn has_scalar(&self, scalar: &ScalarType) -> bool {
        self.scalars.contains(scalar)
            || self
                .tables
                .iter()
                .any(|t| t.columns.iter().any(|c| &c.column_type == scalar))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbTableMetadata {
    pub name: TableName,
    pub columns: Vec<RawColumnInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<TableDistribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rows of an enum table, value to comment. Only read for tables tracked with `is_enum`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<BTreeMap<String, Option<String>>>,
}

impl DbTableMetadata {
    pub fn column(&self, name: &ColumnName) -> Option<&RawColumnInfo> {
        self.columns.iter().find(|c| &c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawColumnInfo {
    pub name: ColumnName,
    #[serde(rename = "type")]
    pub column_type: ScalarType,
    #[serde(default)]
    pub is_nullable: bool,
    #[serde(default)]
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub constraint: ConstraintName,
    pub columns: Vec<ColumnName>,
}

/// A foreign key constraint, as introspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyMetadata {
    pub constraint: ConstraintName,
    pub foreign_table: TableName,
    /// Local column to referenced column.
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
}

impl ForeignKeyMetadata {
    pub fn local_columns(&self) -> BTreeSet<ColumnName> {
        self.column_mapping.keys().cloned().collect()
    }
}

/// How a table is laid out across a distributed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableDistribution {
    Local,
    Reference,
    Distributed { column: ColumnName },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbFunctionMetadata {
    pub name: FunctionName,
    #[serde(default)]
    pub arguments: Vec<FunctionArgument>,
    pub returns: FunctionReturnType,
    #[serde(default)]
    pub returns_set: bool,
    #[serde(default)]
    pub volatility: FunctionVolatility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub arg_type: FunctionArgType,
    #[serde(default)]
    pub has_default: bool,
}

/// A function argument is either a scalar or a row of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionArgType {
    Scalar(ScalarType),
    Table(TableName),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionReturnType {
    Scalar(ScalarType),
    Table(TableName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionVolatility {
    Immutable,
    Stable,
    #[default]
    Volatile,
}

// ============================================================================
// Resolved information
// ============================================================================

/// What a backend family can do. Checked by the build before resolving
/// objects that need the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCapabilities {
    pub relationships: bool,
    pub computed_fields: bool,
    pub functions: bool,
    pub event_triggers: bool,
    pub native_queries: bool,
    pub enum_tables: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            relationships: true,
            computed_fields: true,
            functions: true,
            event_triggers: true,
            native_queries: true,
            enum_tables: true,
        }
    }
}

/// A source configuration the adapter accepted, with environment references resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSourceConfig {
    pub kind: BackendKind,
    pub connection: serde_json::Value,
    pub capabilities: BackendCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedFieldInfo {
    pub name: ComputedFieldName,
    pub function: FunctionName,
    pub returns: FunctionReturnType,
    pub table_argument: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_argument: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTriggerInfo {
    pub name: TriggerName,
    pub table: TableName,
    pub operations: TriggerOpsDef,
    /// Webhook URL with any environment reference resolved.
    pub webhook: String,
    pub retry_conf: RetryConf,
    /// Columns the trigger payload reads, for dependency tracking.
    pub columns: BTreeSet<ColumnName>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub name: FunctionName,
    pub graphql_name: String,
    pub arguments: Vec<FunctionArgument>,
    pub returns: FunctionReturnType,
    pub returns_set: bool,
    pub exposed_as: FunctionExposedAs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_argument: Option<String>,
}

/// Value to optional comment, for enum tables.
pub type EnumValues = BTreeMap<String, Option<String>>;

/// One comparison in a boolean expression: `{"_eq": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpExp {
    pub operator: String,
    pub value: serde_json::Value,
}

/// Description of a data connector agent, as fetched from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: DataConnectorName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub capabilities: BackendCapabilities,
    #[serde(default)]
    pub scalar_types: BTreeSet<ScalarType>,
}

/// Root fields of a remote GraphQL schema, as introspected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteIntrospection {
    #[serde(default)]
    pub query_root: BTreeSet<String>,
    #[serde(default)]
    pub mutation_root: BTreeSet<String>,
    /// Named types the remote schema defines.
    #[serde(default)]
    pub types: BTreeSet<String>,
}
