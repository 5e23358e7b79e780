//! An adapter driven by introspection snapshots.
//!
//! Instead of querying a live database, [`SnapshotBackend`] answers from a
//! [`DatabaseMetadata`] per source that the embedder supplies (the CLI reads
//! it from a JSON file). One instance serves one backend family; the family
//! decides the connection keys, the text operators and the relationship rules.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::types::*;
use super::{
    parse_comparison_operators, BackendError, BackendMetadata, BackendResult, TEXT_OPERATORS,
};
use crate::cache::types::RelInfo;
use crate::config::Environment;
use crate::metadata::names::*;
use crate::metadata::source::{BackendKind, RelType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Postgres,
    Citus,
    Mssql,
    BigQuery,
    DataConnector,
}

impl Family {
    fn name(self) -> &'static str {
        match self {
            Family::Postgres => "postgres",
            Family::Citus => "citus",
            Family::Mssql => "mssql",
            Family::BigQuery => "bigquery",
            Family::DataConnector => "dataconnector",
        }
    }

    /// Key inside `connection_info` that must be present.
    fn connection_key(self) -> Option<&'static str> {
        match self {
            Family::Postgres | Family::Citus => Some("database_url"),
            Family::Mssql => Some("connection_string"),
            Family::BigQuery => Some("project_id"),
            Family::DataConnector => None,
        }
    }

    fn text_operators(self) -> &'static [&'static str] {
        match self {
            Family::Postgres | Family::Citus => &TEXT_OPERATORS,
            Family::Mssql => &["_like", "_nlike"],
            Family::BigQuery | Family::DataConnector => &["_like"],
        }
    }

    fn capabilities(self) -> BackendCapabilities {
        match self {
            Family::Postgres | Family::Citus => BackendCapabilities::default(),
            Family::Mssql => BackendCapabilities {
                computed_fields: false,
                functions: false,
                ..BackendCapabilities::default()
            },
            Family::BigQuery => BackendCapabilities {
                event_triggers: false,
                functions: false,
                enum_tables: false,
                ..BackendCapabilities::default()
            },
            Family::DataConnector => BackendCapabilities {
                computed_fields: false,
                functions: false,
                event_triggers: false,
                enum_tables: false,
                ..BackendCapabilities::default()
            },
        }
    }
}

/// Snapshot-driven implementation of [`BackendMetadata`].
#[derive(Debug)]
pub struct SnapshotBackend {
    family: Family,
    databases: RwLock<HashMap<SourceName, DatabaseMetadata>>,
    unreachable: RwLock<HashSet<SourceName>>,
    installed_triggers: Mutex<Vec<(SourceName, TableName, TriggerName)>>,
    dropped_sources: Mutex<Vec<SourceName>>,
    introspections: AtomicUsize,
}

impl SnapshotBackend {
    fn new(family: Family) -> Self {
        Self {
            family,
            databases: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            installed_triggers: Mutex::new(Vec::new()),
            dropped_sources: Mutex::new(Vec::new()),
            introspections: AtomicUsize::new(0),
        }
    }

    pub fn postgres() -> Self {
        Self::new(Family::Postgres)
    }

    pub fn citus() -> Self {
        Self::new(Family::Citus)
    }

    pub fn mssql() -> Self {
        Self::new(Family::Mssql)
    }

    pub fn bigquery() -> Self {
        Self::new(Family::BigQuery)
    }

    pub fn data_connector() -> Self {
        Self::new(Family::DataConnector)
    }

    /// The adapter for a backend kind.
    pub fn for_kind(kind: &BackendKind) -> Self {
        match kind {
            BackendKind::Postgres => Self::postgres(),
            BackendKind::Citus => Self::citus(),
            BackendKind::Mssql => Self::mssql(),
            BackendKind::BigQuery => Self::bigquery(),
            BackendKind::DataConnector(_) => Self::data_connector(),
        }
    }

    pub fn with_database(self, source: impl Into<SourceName>, db: DatabaseMetadata) -> Self {
        self.set_database(source, db);
        self
    }

    /// Replace what introspecting `source` returns.
    pub fn set_database(&self, source: impl Into<SourceName>, db: DatabaseMetadata) {
        let mut databases = self.databases.write().unwrap_or_else(|e| e.into_inner());
        databases.insert(source.into(), db);
    }

    /// Make introspection of `source` fail with a connection error.
    pub fn set_unreachable(&self, source: impl Into<SourceName>, unreachable: bool) {
        let mut set = self.unreachable.write().unwrap_or_else(|e| e.into_inner());
        let source = source.into();
        if unreachable {
            set.insert(source);
        } else {
            set.remove(&source);
        }
    }

    /// How many times any source was introspected.
    pub fn introspection_count(&self) -> usize {
        self.introspections.load(Ordering::SeqCst)
    }

    pub fn installed_triggers(&self) -> Vec<(SourceName, TableName, TriggerName)> {
        self.installed_triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn dropped_sources(&self) -> Vec<SourceName> {
        self.dropped_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn resolve_env_value(value: &Value, env: &Environment) -> BackendResult<Value> {
        match value {
            Value::Object(map) if map.len() == 1 && map.contains_key("from_env") => {
                let var = map
                    .get("from_env")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BackendError::InvalidConfiguration("from_env expects a string".to_string())
                    })?;
                env.get(var)
                    .map(|v| Value::String(v.to_string()))
                    .ok_or_else(|| BackendError::MissingEnv(var.to_string()))
            }
            other => Ok(other.clone()),
        }
    }
}

#[async_trait]
impl BackendMetadata for SnapshotBackend {
    fn family(&self) -> &'static str {
        self.family.name()
    }

    async fn resolve_source_config(
        &self,
        source: &SourceName,
        kind: &BackendKind,
        configuration: &Value,
        env: &Environment,
    ) -> BackendResult<ResolvedSourceConfig> {
        let empty = Map::new();
        let config = match configuration {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(BackendError::InvalidConfiguration(format!(
                    "configuration of source \"{}\" must be an object",
                    source
                )))
            }
        };

        let mut connection = Map::new();
        if let Some(key) = self.family.connection_key() {
            let info = config
                .get("connection_info")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    BackendError::InvalidConfiguration("connection_info is required".to_string())
                })?;
            let value = info.get(key).ok_or_else(|| {
                BackendError::InvalidConfiguration(format!("connection_info.{} is required", key))
            })?;
            connection.insert(key.to_string(), Self::resolve_env_value(value, env)?);
        } else {
            for (key, value) in config {
                connection.insert(key.clone(), Self::resolve_env_value(value, env)?);
            }
        }

        Ok(ResolvedSourceConfig {
            kind: kind.clone(),
            connection: Value::Object(connection),
            capabilities: self.family.capabilities(),
        })
    }

    async fn resolve_database_metadata(
        &self,
        source: &SourceName,
        _config: &ResolvedSourceConfig,
    ) -> BackendResult<DatabaseMetadata> {
        self.introspections.fetch_add(1, Ordering::SeqCst);

        let unreachable = self
            .unreachable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(source);
        if unreachable {
            return Err(BackendError::Connection(format!(
                "could not connect to source \"{}\"",
                source
            )));
        }

        self.databases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .cloned()
            .ok_or_else(|| {
                BackendError::Connection(format!("no database is available for source \"{}\"", source))
            })
    }

    async fn create_table_event_trigger(
        &self,
        source: &SourceName,
        _config: &ResolvedSourceConfig,
        trigger: &EventTriggerInfo,
    ) -> BackendResult<()> {
        let mut installed = self
            .installed_triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        installed.push((source.clone(), trigger.table.clone(), trigger.name.clone()));
        Ok(())
    }

    async fn post_drop_source_hook(
        &self,
        source: &SourceName,
        _config: &ResolvedSourceConfig,
    ) -> BackendResult<()> {
        self.dropped_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(source.clone());
        self.installed_triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(s, _, _)| s != source);
        Ok(())
    }

    async fn fetch_and_validate_enum_values(
        &self,
        _source: &SourceName,
        _config: &ResolvedSourceConfig,
        table: &DbTableMetadata,
    ) -> BackendResult<EnumValues> {
        let pk = table.primary_key.as_ref().ok_or_else(|| {
            BackendError::Validation("the table must have a primary key".to_string())
        })?;
        let [pk_column] = pk.columns.as_slice() else {
            return Err(BackendError::Validation(format!(
                "the table's primary key must not span multiple columns ({})",
                pk.columns
                    .iter()
                    .map(ColumnName::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        };
        match table.column(pk_column) {
            Some(col) if matches!(col.column_type.as_str(), "text" | "varchar" | "nvarchar" | "string") => {}
            _ => {
                return Err(BackendError::Validation(format!(
                    "the table's primary key column \"{}\" must be of a text type",
                    pk_column
                )))
            }
        }

        let values = table.enum_values.clone().unwrap_or_default();
        if values.is_empty() {
            return Err(BackendError::Validation(
                "the table must have at least one row".to_string(),
            ));
        }
        let invalid: Vec<_> = values.keys().filter(|v| !is_graphql_name(v)).cloned().collect();
        if !invalid.is_empty() {
            return Err(BackendError::Validation(format!(
                "the following values in the table are not valid GraphQL enum values: {}",
                invalid.join(", ")
            )));
        }
        Ok(values)
    }

    fn validate_relationship(
        &self,
        db: &DatabaseMetadata,
        table: &TableName,
        rel: &RelInfo,
    ) -> BackendResult<()> {
        if self.family != Family::Citus {
            return Ok(());
        }

        let distribution = |t: &TableName| {
            db.table(t)
                .and_then(|t| t.distribution.clone())
                .unwrap_or(TableDistribution::Local)
        };
        let local = distribution(table);
        let remote = distribution(&rel.remote_table);

        match (&local, &remote, rel.rel_type) {
            (TableDistribution::Distributed { .. }, TableDistribution::Local, _) => {
                Err(BackendError::Validation(format!(
                    "relationships from distributed table \"{}\" to local table \"{}\" are not supported",
                    table, rel.remote_table
                )))
            }
            (TableDistribution::Local | TableDistribution::Reference, TableDistribution::Distributed { .. }, _) => {
                Err(BackendError::Validation(format!(
                    "relationships from local or reference table \"{}\" to distributed table \"{}\" are not supported",
                    table, rel.remote_table
                )))
            }
            (TableDistribution::Reference, TableDistribution::Local, RelType::Array) => {
                Err(BackendError::Validation(format!(
                    "array relationships from reference table \"{}\" to local table \"{}\" are not supported",
                    table, rel.remote_table
                )))
            }
            _ => Ok(()),
        }
    }

    fn parse_bool_exp_operations(
        &self,
        column_type: &ScalarType,
        ops: &Value,
    ) -> BackendResult<Vec<OpExp>> {
        parse_comparison_operators(column_type, ops, self.family.text_operators())
    }
}
