//! Backend metadata resolution.
//!
//! The schema cache build depends only on the [`BackendMetadata`] capability
//! interface. Each backend family registers one implementation in a
//! [`BackendRegistry`], keyed by [`BackendKind`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Schema cache build                        │
//! └──────────────────────────────────────────────────────────────┘
//!                           │ BackendRegistry::get(kind)
//!                           ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  dyn BackendMetadata                         │
//! │  async: resolve_source_config, resolve_database_metadata,    │
//! │         create_table_event_trigger, post_drop_source_hook,   │
//! │         fetch_and_validate_enum_values                       │
//! │  sync:  build_computed_field_info, build_event_trigger_info, │
//! │         validate_relationship, parse_bool_exp_operations,    │
//! │         build_function_info                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod remote;
pub mod snapshot;
pub mod types;

pub use remote::{
    DataConnectorAgentProvider, RemoteSchemaProvider, StaticAgentProvider, StaticRemoteSchemaProvider,
};
pub use snapshot::SnapshotBackend;
pub use types::*;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::types::RelInfo;
use crate::config::Environment;
use crate::inconsistency::ResolveError;
use crate::metadata::names::*;
use crate::metadata::source::{
    BackendKind, ComputedFieldMetadata, EventTriggerConf, FunctionExposedAs, FunctionMetadata,
    PermColumns,
};

/// Errors reported by backend adapters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("environment variable '{0}' not set")]
    MissingEnv(String),

    #[error("{0}")]
    Validation(String),

    #[error("not supported: {0}")]
    Unsupported(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl From<BackendError> for ResolveError {
    fn from(err: BackendError) -> Self {
        ResolveError::new(err.to_string())
    }
}

/// Capability interface every backend family implements.
///
/// The synchronous methods have generic default implementations; families
/// override the ones whose rules differ.
#[async_trait]
pub trait BackendMetadata: Send + Sync {
    /// Short family name, for logs.
    fn family(&self) -> &'static str;

    /// Validate a source's configuration and resolve environment references in it.
    async fn resolve_source_config(
        &self,
        source: &SourceName,
        kind: &BackendKind,
        configuration: &Value,
        env: &Environment,
    ) -> BackendResult<ResolvedSourceConfig>;

    /// Introspect the tables, functions and scalar types of a source.
    async fn resolve_database_metadata(
        &self,
        source: &SourceName,
        config: &ResolvedSourceConfig,
    ) -> BackendResult<DatabaseMetadata>;

    /// Install an event trigger in the database. Only called for builds this
    /// instance authored.
    async fn create_table_event_trigger(
        &self,
        source: &SourceName,
        config: &ResolvedSourceConfig,
        trigger: &EventTriggerInfo,
    ) -> BackendResult<()>;

    /// Clean up after a source was removed from the metadata.
    async fn post_drop_source_hook(
        &self,
        source: &SourceName,
        config: &ResolvedSourceConfig,
    ) -> BackendResult<()>;

    /// Read and check the rows of a table tracked as an enum.
    async fn fetch_and_validate_enum_values(
        &self,
        source: &SourceName,
        config: &ResolvedSourceConfig,
        table: &DbTableMetadata,
    ) -> BackendResult<EnumValues>;

    /// Reject relationship shapes the backend cannot execute.
    fn validate_relationship(
        &self,
        _db: &DatabaseMetadata,
        _table: &TableName,
        _rel: &RelInfo,
    ) -> BackendResult<()> {
        Ok(())
    }

    /// Check the operators applied to a column of type `column_type`.
    fn parse_bool_exp_operations(
        &self,
        column_type: &ScalarType,
        ops: &Value,
    ) -> BackendResult<Vec<OpExp>> {
        parse_comparison_operators(column_type, ops, &TEXT_OPERATORS)
    }

    fn build_computed_field_info(
        &self,
        table: &TableName,
        definition: &ComputedFieldMetadata,
        function: &DbFunctionMetadata,
    ) -> BackendResult<ComputedFieldInfo> {
        let def = &definition.definition;
        let table_arg_index = match &def.table_argument {
            Some(name) => function
                .arguments
                .iter()
                .position(|a| a.name.as_deref() == Some(name.as_str()))
                .ok_or_else(|| {
                    BackendError::Validation(format!(
                        "the function \"{}\" does not have an argument named \"{}\"",
                        def.function, name
                    ))
                })?,
            None => 0,
        };

        let table_arg = match function.arguments.get(table_arg_index) {
            Some(arg @ FunctionArgument {
                arg_type: FunctionArgType::Table(arg_table),
                ..
            }) if arg_table == table => arg,
            _ => {
                return Err(BackendError::Validation(format!(
                    "the function \"{}\" does not accept a row of table \"{}\" as its table argument",
                    def.function, table
                )))
            }
        };

        check_session_argument(&def.function, function, def.session_argument.as_deref())?;

        Ok(ComputedFieldInfo {
            name: definition.name.clone(),
            function: def.function.clone(),
            returns: function.returns.clone(),
            table_argument: table_arg
                .name
                .clone()
                .unwrap_or_else(|| format!("${}", table_arg_index + 1)),
            session_argument: def.session_argument.clone(),
        })
    }

    fn build_event_trigger_info(
        &self,
        env: &Environment,
        table: &TableName,
        columns: &BTreeSet<ColumnName>,
        conf: &EventTriggerConf,
    ) -> BackendResult<EventTriggerInfo> {
        let webhook = match (&conf.webhook, &conf.webhook_from_env) {
            (Some(url), _) => url.clone(),
            (None, Some(var)) => env
                .get(var)
                .map(str::to_string)
                .ok_or_else(|| BackendError::MissingEnv(var.clone()))?,
            (None, None) => {
                return Err(BackendError::InvalidConfiguration(
                    "either webhook or webhook_from_env is required".to_string(),
                ))
            }
        };

        let mut used = BTreeSet::new();
        for spec in conf.definition.op_specs() {
            for cols in std::iter::once(&spec.columns).chain(spec.payload.iter()) {
                match cols {
                    PermColumns::All => used.extend(columns.iter().cloned()),
                    PermColumns::Columns(list) => {
                        for col in list {
                            if !columns.contains(col) {
                                return Err(BackendError::Validation(format!(
                                    "column \"{}\" does not exist on table \"{}\"",
                                    col, table
                                )));
                            }
                            used.insert(col.clone());
                        }
                    }
                }
            }
        }

        Ok(EventTriggerInfo {
            name: conf.name.clone(),
            table: table.clone(),
            operations: conf.definition.clone(),
            webhook,
            retry_conf: conf.retry_conf.clone(),
            columns: used,
        })
    }

    fn build_function_info(
        &self,
        definition: &FunctionMetadata,
        raw: &DbFunctionMetadata,
    ) -> BackendResult<FunctionInfo> {
        let config = &definition.configuration;
        let graphql_name = config
            .custom_name
            .clone()
            .unwrap_or_else(|| definition.function.graphql_name());
        if !is_graphql_name(&graphql_name) {
            return Err(BackendError::Validation(format!(
                "function name \"{}\" is not a valid GraphQL name",
                graphql_name
            )));
        }

        check_session_argument(&definition.function, raw, config.session_argument.as_deref())?;

        let exposed_as = match (config.exposed_as, raw.volatility) {
            (Some(exposed), _) => exposed,
            (None, FunctionVolatility::Volatile) => FunctionExposedAs::Mutation,
            (None, _) => FunctionExposedAs::Query,
        };

        Ok(FunctionInfo {
            name: definition.function.clone(),
            graphql_name,
            arguments: raw.arguments.clone(),
            returns: raw.returns.clone(),
            returns_set: raw.returns_set,
            exposed_as,
            session_argument: config.session_argument.clone(),
        })
    }
}

fn check_session_argument(
    function_name: &FunctionName,
    function: &DbFunctionMetadata,
    session_argument: Option<&str>,
) -> BackendResult<()> {
    let Some(name) = session_argument else {
        return Ok(());
    };
    let arg = function
        .arguments
        .iter()
        .find(|a| a.name.as_deref() == Some(name))
        .ok_or_else(|| {
            BackendError::Validation(format!(
                "the function \"{}\" does not have an argument named \"{}\"",
                function_name, name
            ))
        })?;
    match &arg.arg_type {
        FunctionArgType::Scalar(t) if t.as_str() == "json" || t.as_str() == "jsonb" => Ok(()),
        _ => Err(BackendError::Validation(format!(
            "session argument \"{}\" of function \"{}\" must be of type json",
            name, function_name
        ))),
    }
}

/// Operators every backend understands.
pub const COMPARISON_OPERATORS: [&str; 9] =
    ["_eq", "_neq", "_gt", "_lt", "_gte", "_lte", "_in", "_nin", "_is_null"];

/// Text operators of the Postgres family.
pub const TEXT_OPERATORS: [&str; 6] = ["_like", "_nlike", "_ilike", "_nilike", "_similar", "_nsimilar"];

/// Operators on JSON documents.
pub const JSON_OPERATORS: [&str; 5] = ["_contains", "_contained_in", "_has_key", "_has_keys_any", "_has_keys_all"];

fn is_text_type(t: &ScalarType) -> bool {
    matches!(
        t.as_str().to_ascii_lowercase().as_str(),
        "text" | "varchar" | "character varying" | "citext" | "string" | "nvarchar" | "char" | "bpchar"
    )
}

fn is_json_type(t: &ScalarType) -> bool {
    matches!(t.as_str(), "json" | "jsonb")
}

/// Check a `{"_op": value, ...}` object against the operators available for
/// `column_type`, with `text_ops` as the text-matching operators the backend offers.
pub fn parse_comparison_operators(
    column_type: &ScalarType,
    ops: &Value,
    text_ops: &[&str],
) -> BackendResult<Vec<OpExp>> {
    let Value::Object(map) = ops else {
        return Err(BackendError::Validation(format!(
            "expecting an object of operators for a column of type \"{}\"",
            column_type
        )));
    };

    let mut parsed = Vec::with_capacity(map.len());
    for (operator, value) in map {
        let known = COMPARISON_OPERATORS.contains(&operator.as_str())
            || (is_text_type(column_type) && text_ops.contains(&operator.as_str()))
            || (is_json_type(column_type) && JSON_OPERATORS.contains(&operator.as_str()));
        if !known {
            return Err(BackendError::Validation(format!(
                "unknown operator \"{}\" for type \"{}\"",
                operator, column_type
            )));
        }

        match operator.as_str() {
            "_in" | "_nin" | "_has_keys_any" | "_has_keys_all" if !value.is_array() => {
                return Err(BackendError::Validation(format!(
                    "operator \"{}\" expects an array",
                    operator
                )))
            }
            "_is_null" if !value.is_boolean() => {
                return Err(BackendError::Validation(
                    "operator \"_is_null\" expects a boolean".to_string(),
                ))
            }
            _ => {}
        }

        parsed.push(OpExp {
            operator: operator.clone(),
            value: value.clone(),
        });
    }
    Ok(parsed)
}

/// Maps each backend kind to its adapter.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn BackendMetadata>>,
    /// Adapter shared by every data connector kind without a dedicated entry.
    data_connector: Option<Arc<dyn BackendMetadata>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, kind: BackendKind, backend: Arc<dyn BackendMetadata>) -> Self {
        self.register(kind, backend);
        self
    }

    pub fn with_data_connector_backend(mut self, backend: Arc<dyn BackendMetadata>) -> Self {
        self.data_connector = Some(backend);
        self
    }

    pub fn register(&mut self, kind: BackendKind, backend: Arc<dyn BackendMetadata>) {
        self.backends.insert(kind, backend);
    }

    pub fn get(&self, kind: &BackendKind) -> Option<Arc<dyn BackendMetadata>> {
        if let Some(backend) = self.backends.get(kind) {
            return Some(Arc::clone(backend));
        }
        match kind {
            BackendKind::DataConnector(_) => self.data_connector.clone(),
            _ => None,
        }
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.backends.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("BackendRegistry")
            .field("backends", &kinds)
            .field("data_connector", &self.data_connector.is_some())
            .finish()
    }
}
