//! The metadata document.
//!
//! The document is the declarative source of truth that the schema cache is
//! built from. It is plain data: nothing in this module talks to a database.
//!
//! # Layout
//!
//! ```text
//! Metadata
//! ├── sources[]
//! │   ├── tables[]            relationships, permissions, computed fields, event triggers
//! │   ├── functions[]
//! │   ├── logical_models[]    fields, select permissions
//! │   └── native_queries[]
//! ├── remote_schemas[]        permissions
//! ├── query_collections[]     saved queries
//! ├── allowlist[]
//! ├── rest_endpoints[]
//! ├── opentelemetry
//! └── backend_configs         data connector agents
//! ```

pub mod collections;
pub mod logical;
pub mod names;
pub mod remote;
pub mod source;
pub mod validation;

pub use collections::*;
pub use logical::*;
pub use names::*;
pub use remote::*;
pub use source::*;
pub use validation::{validate, ValidationError};

use serde::{Deserialize, Serialize};

use crate::schema::{
    LogicalModelMetadataObjId, MetadataObjId, SourceMetadataObjId, TableMetadataObjId,
};

/// Current document format version.
pub const METADATA_VERSION: u32 = 3;

fn current_version() -> u32 {
    METADATA_VERSION
}

/// The full metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "current_version")]
    pub version: u32,

    #[serde(default)]
    pub sources: Vec<SourceMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_schemas: Vec<RemoteSchemaMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_collections: Vec<QueryCollection>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist: Vec<AllowlistEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rest_endpoints: Vec<RestEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opentelemetry: Option<OpenTelemetryConfig>,

    #[serde(default, skip_serializing_if = "BackendConfigs::is_empty")]
    pub backend_configs: BackendConfigs,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            sources: Vec::new(),
            remote_schemas: Vec::new(),
            query_collections: Vec::new(),
            allowlist: Vec::new(),
            rest_endpoints: Vec::new(),
            opentelemetry: None,
            backend_configs: BackendConfigs::default(),
        }
    }
}

impl Metadata {
    pub fn source(&self, name: &SourceName) -> Option<&SourceMetadata> {
        self.sources.iter().find(|s| &s.name == name)
    }

    pub fn source_mut(&mut self, name: &SourceName) -> Option<&mut SourceMetadata> {
        self.sources.iter_mut().find(|s| &s.name == name)
    }

    pub fn table_mut(&mut self, source: &SourceName, table: &TableName) -> Option<&mut TableMetadata> {
        self.source_mut(source)?.table_mut(table)
    }

    pub fn remote_schema(&self, name: &RemoteSchemaName) -> Option<&RemoteSchemaMetadata> {
        self.remote_schemas.iter().find(|r| &r.name == name)
    }

    pub fn remote_schema_mut(&mut self, name: &RemoteSchemaName) -> Option<&mut RemoteSchemaMetadata> {
        self.remote_schemas.iter_mut().find(|r| &r.name == name)
    }

    pub fn query_collection(&self, name: &CollectionName) -> Option<&QueryCollection> {
        self.query_collections.iter().find(|c| &c.name == name)
    }

    /// Remove the object named by `id` (and everything nested in it).
    ///
    /// Removing an object that is not present is a no-op.
    pub fn purge(&mut self, id: &MetadataObjId) {
        match id {
            MetadataObjId::Source { source } => self.sources.retain(|s| &s.name != source),
            MetadataObjId::SourceObj { source, object } => {
                if let Some(source) = self.source_mut(source) {
                    purge_source_object(source, object);
                }
            }
            MetadataObjId::RemoteSchema { name } => self.remote_schemas.retain(|r| &r.name != name),
            MetadataObjId::RemoteSchemaPermission { name, role } => {
                if let Some(remote) = self.remote_schema_mut(name) {
                    remote.permissions.retain(|p| &p.role != role);
                }
            }
            MetadataObjId::QueryCollection { name } => {
                self.query_collections.retain(|c| &c.name != name)
            }
            MetadataObjId::Query { collection, query } => {
                if let Some(c) = self.query_collections.iter_mut().find(|c| &c.name == collection) {
                    c.definition.queries.retain(|q| &q.name != query);
                }
            }
            MetadataObjId::Allowlist { collection } => {
                self.allowlist.retain(|a| &a.collection != collection)
            }
            MetadataObjId::Endpoint { name } => self.rest_endpoints.retain(|e| &e.name != name),
            MetadataObjId::DataConnector { name } => {
                self.backend_configs.dataconnector.remove(name);
            }
            MetadataObjId::OpenTelemetry => self.opentelemetry = None,
        }
    }
}

fn purge_source_object(source: &mut SourceMetadata, object: &SourceMetadataObjId) {
    match object {
        SourceMetadataObjId::Table { table } => source.tables.retain(|t| &t.table != table),
        SourceMetadataObjId::Function { function } => {
            source.functions.retain(|f| &f.function != function)
        }
        SourceMetadataObjId::LogicalModel { name } => {
            source.logical_models.retain(|m| &m.name != name)
        }
        SourceMetadataObjId::NativeQuery { name } => {
            source.native_queries.retain(|q| &q.root_field_name != name)
        }
        SourceMetadataObjId::TableObj { table, object } => {
            let Some(table) = source.table_mut(table) else {
                return;
            };
            match object {
                TableMetadataObjId::Relationship { name, .. } => {
                    table.object_relationships.retain(|r| &r.name != name);
                    table.array_relationships.retain(|r| &r.name != name);
                }
                TableMetadataObjId::ComputedField { name } => {
                    table.computed_fields.retain(|c| &c.name != name)
                }
                TableMetadataObjId::Permission { role, perm_type } => {
                    table.remove_permission(role, *perm_type)
                }
                TableMetadataObjId::EventTrigger { name } => {
                    table.event_triggers.retain(|t| &t.name != name)
                }
            }
        }
        SourceMetadataObjId::LogicalModelObj { name, object } => {
            let Some(model) = source.logical_models.iter_mut().find(|m| &m.name == name) else {
                return;
            };
            match object {
                LogicalModelMetadataObjId::Permission { role } => {
                    model.select_permissions.retain(|p| &p.role != role)
                }
            }
        }
    }
}
