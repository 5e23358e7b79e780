//! Sources and everything tracked inside them: tables, relationships,
//! permissions, computed fields, functions and event triggers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::logical::{LogicalModelMetadata, NativeQueryMetadata};
use super::names::*;

// ============================================================================
// Sources
// ============================================================================

/// Backend family of a source.
///
/// Known families are matched by name; any other kind string is taken to be the
/// name of a data connector agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    Postgres,
    Citus,
    Mssql,
    BigQuery,
    DataConnector(DataConnectorName),
}

impl BackendKind {
    pub fn as_str(&self) -> &str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Citus => "citus",
            BackendKind::Mssql => "mssql",
            BackendKind::BigQuery => "bigquery",
            BackendKind::DataConnector(name) => name.as_str(),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BackendKind {
    fn from(s: &str) -> Self {
        match s {
            "postgres" | "pg" => BackendKind::Postgres,
            "citus" => BackendKind::Citus,
            "mssql" => BackendKind::Mssql,
            "bigquery" => BackendKind::BigQuery,
            other => BackendKind::DataConnector(DataConnectorName::new(other)),
        }
    }
}

impl Serialize for BackendKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BackendKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(BackendKind::from(s.as_str()))
    }
}

/// A database source and the objects tracked in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub name: SourceName,
    pub kind: BackendKind,

    /// Backend-specific connection configuration, interpreted only by the adapter.
    #[serde(default)]
    pub configuration: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logical_models: Vec<LogicalModelMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub native_queries: Vec<NativeQueryMetadata>,
}

impl SourceMetadata {
    pub fn new(name: impl Into<SourceName>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            configuration: serde_json::Value::Null,
            tables: Vec::new(),
            functions: Vec::new(),
            logical_models: Vec::new(),
            native_queries: Vec::new(),
        }
    }

    pub fn table(&self, name: &TableName) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| &t.table == name)
    }

    pub fn table_mut(&mut self, name: &TableName) -> Option<&mut TableMetadata> {
        self.tables.iter_mut().find(|t| &t.table == name)
    }
}

// ============================================================================
// Tables
// ============================================================================

/// A tracked table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table: TableName,

    /// Expose the table's rows as a GraphQL enum.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_enum: bool,

    #[serde(default)]
    pub configuration: TableConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_relationships: Vec<RelDef<ObjRelUsing>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub array_relationships: Vec<RelDef<ArrRelUsing>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computed_fields: Vec<ComputedFieldMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_permissions: Vec<PermDef<SelectPermission>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insert_permissions: Vec<PermDef<InsertPermission>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_permissions: Vec<PermDef<UpdatePermission>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_permissions: Vec<PermDef<DeletePermission>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_triggers: Vec<EventTriggerConf>,
}

impl TableMetadata {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            is_enum: false,
            configuration: TableConfig::default(),
            object_relationships: Vec::new(),
            array_relationships: Vec::new(),
            computed_fields: Vec::new(),
            select_permissions: Vec::new(),
            insert_permissions: Vec::new(),
            update_permissions: Vec::new(),
            delete_permissions: Vec::new(),
            event_triggers: Vec::new(),
        }
    }

    /// Names of all relationships, object relationships first.
    pub fn relationship_names(&self) -> impl Iterator<Item = &RelName> {
        self.object_relationships
            .iter()
            .map(|r| &r.name)
            .chain(self.array_relationships.iter().map(|r| &r.name))
    }

    pub fn has_relationship(&self, name: &RelName) -> bool {
        self.relationship_names().any(|n| n == name)
    }

    pub fn has_permission(&self, role: &RoleName, perm_type: PermType) -> bool {
        match perm_type {
            PermType::Select => self.select_permissions.iter().any(|p| &p.role == role),
            PermType::Insert => self.insert_permissions.iter().any(|p| &p.role == role),
            PermType::Update => self.update_permissions.iter().any(|p| &p.role == role),
            PermType::Delete => self.delete_permissions.iter().any(|p| &p.role == role),
        }
    }

    pub fn remove_permission(&mut self, role: &RoleName, perm_type: PermType) {
        match perm_type {
            PermType::Select => self.select_permissions.retain(|p| &p.role != role),
            PermType::Insert => self.insert_permissions.retain(|p| &p.role != role),
            PermType::Update => self.update_permissions.retain(|p| &p.role != role),
            PermType::Delete => self.delete_permissions.retain(|p| &p.role != role),
        }
    }
}

/// GraphQL customization of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,

    #[serde(default)]
    pub custom_root_fields: CustomRootFields,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_config: BTreeMap<ColumnName, ColumnConfig>,
}

/// Per-column customization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Scalar type the column is exposed as, overriding the introspected type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type: Option<ScalarType>,
}

/// Overrides for the generated root field names of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomRootFields {
    pub select: Option<String>,
    pub select_by_pk: Option<String>,
    pub select_aggregate: Option<String>,
    pub insert: Option<String>,
    pub insert_one: Option<String>,
    pub update: Option<String>,
    pub update_by_pk: Option<String>,
    pub delete: Option<String>,
    pub delete_by_pk: Option<String>,
}

// ============================================================================
// Relationships
// ============================================================================

/// A named relationship definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelDef<U> {
    pub name: RelName,
    pub using: U,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One column or a list of columns.
///
/// Deserialises from `"author_id"` or `["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns(pub Vec<ColumnName>);

impl Columns {
    pub fn single(column: impl Into<ColumnName>) -> Self {
        Self(vec![column.into()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnName> {
        self.0.iter()
    }

    /// Column set, for comparison against constraint columns.
    pub fn to_set(&self) -> std::collections::BTreeSet<ColumnName> {
        self.0.iter().cloned().collect()
    }
}

impl Serialize for Columns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Columns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(ColumnName),
            Many(Vec<ColumnName>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(c) => Columns(vec![c]),
            Repr::Many(cs) => Columns(cs),
        })
    }
}

/// How an object relationship is joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjRelUsing {
    ForeignKeyConstraintOn(ObjRelFkUsing),
    ManualConfiguration(RelManualConfig),
}

/// Foreign key form of an object relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjRelFkUsing {
    /// The constraint lives on this table, over these columns.
    Local(Columns),
    /// The constraint lives on `table` and points back at this table.
    Remote {
        table: TableName,
        #[serde(alias = "column")]
        columns: Columns,
    },
}

/// How an array relationship is joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrRelUsing {
    ForeignKeyConstraintOn(ArrRelFkUsing),
    ManualConfiguration(RelManualConfig),
}

/// The remote table's constraint pointing back at this table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrRelFkUsing {
    pub table: TableName,
    #[serde(alias = "column")]
    pub columns: Columns,
}

/// Explicit column mapping between two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelManualConfig {
    pub remote_table: TableName,
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
}

/// Object (many-to-one / one-to-one) or array (one-to-many).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelType {
    Object,
    Array,
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelType::Object => f.write_str("object"),
            RelType::Array => f.write_str("array"),
        }
    }
}

// ============================================================================
// Permissions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermType {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for PermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermType::Select => "select",
            PermType::Insert => "insert",
            PermType::Update => "update",
            PermType::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A permission granted to one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermDef<P> {
    pub role: RoleName,
    pub permission: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// `"*"` or an explicit column list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PermColumns {
    #[default]
    All,
    Columns(Vec<ColumnName>),
}

impl Serialize for PermColumns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PermColumns::All => serializer.serialize_str("*"),
            PermColumns::Columns(cols) => cols.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PermColumns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Star(String),
            Columns(Vec<ColumnName>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Star(s) if s == "*" => Ok(PermColumns::All),
            Repr::Star(s) => Err(serde::de::Error::custom(format!(
                "expected \"*\" or a list of columns, found \"{}\"",
                s
            ))),
            Repr::Columns(cols) => Ok(PermColumns::Columns(cols)),
        }
    }
}

/// A boolean expression over the columns and relationships of a table, kept
/// as raw JSON until the build resolves it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoolExp(pub serde_json::Value);

impl BoolExp {
    /// The always-true expression `{}`.
    pub fn true_() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectPermission {
    pub columns: PermColumns,
    #[serde(default = "BoolExp::true_")]
    pub filter: BoolExp,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_aggregations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computed_fields: Vec<ComputedFieldName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertPermission {
    #[serde(default = "BoolExp::true_")]
    pub check: BoolExp,
    pub columns: PermColumns,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<ColumnName, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePermission {
    pub columns: PermColumns,
    #[serde(default = "BoolExp::true_")]
    pub filter: BoolExp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<BoolExp>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<ColumnName, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePermission {
    #[serde(default = "BoolExp::true_")]
    pub filter: BoolExp,
}

// ============================================================================
// Computed fields, functions, event triggers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFieldMetadata {
    pub name: ComputedFieldName,
    pub definition: ComputedFieldDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFieldDefinition {
    pub function: FunctionName,
    /// Name of the argument receiving the table row; defaults to the first argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_argument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_argument: Option<String>,
}

/// A database function exposed as a root field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    pub function: FunctionName,
    #[serde(default)]
    pub configuration: FunctionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_as: Option<FunctionExposedAs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_argument: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionExposedAs {
    Query,
    Mutation,
}

/// A database event trigger delivering row changes to a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTriggerConf {
    pub name: TriggerName,
    pub definition: TriggerOpsDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_from_env: Option<String>,
    #[serde(default)]
    pub retry_conf: RetryConf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerOpsDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<SubscribeOpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<SubscribeOpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<SubscribeOpSpec>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_manual: bool,
}

impl TriggerOpsDef {
    pub fn is_empty(&self) -> bool {
        self.insert.is_none() && self.update.is_none() && self.delete.is_none() && !self.enable_manual
    }

    pub fn op_specs(&self) -> impl Iterator<Item = &SubscribeOpSpec> {
        self.insert
            .iter()
            .chain(self.update.iter())
            .chain(self.delete.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOpSpec {
    pub columns: PermColumns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PermColumns>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConf {
    pub num_retries: u32,
    pub interval_sec: u32,
    pub timeout_sec: u32,
}

impl Default for RetryConf {
    fn default() -> Self {
        Self {
            num_retries: 0,
            interval_sec: 10,
            timeout_sec: 60,
        }
    }
}
