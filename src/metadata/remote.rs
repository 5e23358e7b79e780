//! Remote GraphQL schemas stitched into the API.

use serde::{Deserialize, Serialize};

use super::names::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchemaMetadata {
    pub name: RemoteSchemaName,
    pub definition: RemoteSchemaDef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<RemoteSchemaPermissionMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Where and how to reach a remote schema.
///
/// Exactly one of `url` / `url_from_env` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchemaDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_from_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forward_client_headers: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderConf>,
}

/// A static header or one read from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderConf {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_env: Option<String>,
}

/// A role's restricted view of a remote schema, as SDL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchemaPermissionMetadata {
    pub role: RoleName,
    pub definition: RemoteSchemaPermissionDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchemaPermissionDef {
    pub schema: String,
}
