//! Query collections, the allow list, REST endpoints and the remaining
//! top-level configuration objects (OpenTelemetry, data connector agents).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::names::*;

// ============================================================================
// Query collections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCollection {
    pub name: CollectionName,
    pub definition: CollectionDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl QueryCollection {
    pub fn query(&self, name: &QueryName) -> Option<&ListedQuery> {
        self.definition.queries.iter().find(|q| &q.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDef {
    #[serde(default)]
    pub queries: Vec<ListedQuery>,
}

/// A saved GraphQL document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedQuery {
    pub name: QueryName,
    pub query: String,
}

// ============================================================================
// Allow list
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub collection: CollectionName,
    #[serde(default)]
    pub scope: AllowlistScope,
}

/// `{"global": true}` or `{"global": false, "roles": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistScope {
    #[serde(default = "default_global")]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleName>,
}

fn default_global() -> bool {
    true
}

impl Default for AllowlistScope {
    fn default() -> Self {
        Self {
            global: true,
            roles: Vec::new(),
        }
    }
}

// ============================================================================
// REST endpoints
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A saved query served under a REST route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestEndpoint {
    pub name: EndpointName,
    /// Route template such as `authors/:id`.
    pub url: String,
    pub methods: Vec<HttpMethod>,
    pub definition: EndpointDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl RestEndpoint {
    /// The route with `:param` segments normalised, for conflict detection.
    pub fn route_shape(&self) -> String {
        self.url
            .trim_matches('/')
            .split('/')
            .map(|seg| if seg.starts_with(':') { ":" } else { seg })
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDef {
    pub query: QueryReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReference {
    pub collection_name: CollectionName,
    pub query_name: QueryName,
}

// ============================================================================
// OpenTelemetry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtelStatus {
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtelDataType {
    Traces,
    Metrics,
    Logs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    #[serde(default)]
    pub status: OtelStatus,
    #[serde(default)]
    pub data_types: Vec<OtelDataType>,
    #[serde(default)]
    pub exporter_otlp: OtlpExporterConfig,
    #[serde(default)]
    pub batch_span_processor: BatchSpanProcessorConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtlpExporterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_traces_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_metrics_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<super::remote::HeaderConf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSpanProcessorConfig {
    pub max_export_batch_size: u32,
}

impl Default for BatchSpanProcessorConfig {
    fn default() -> Self {
        Self {
            max_export_batch_size: 512,
        }
    }
}

// ============================================================================
// Data connector agents
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfigs {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dataconnector: BTreeMap<DataConnectorName, DataConnectorOptions>,
}

impl BackendConfigs {
    pub fn is_empty(&self) -> bool {
        self.dataconnector.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConnectorOptions {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}
