//! # Schemacache
//!
//! Metadata resolution, dependency tracking and a hot-swappable schema cache
//! for a GraphQL engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │         Metadata document (sources, tables, rels,       │
//! │   permissions, remote schemas, collections, endpoints)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [api: metadata commands]
//! ┌─────────────────────────────────────────────────────────┐
//! │     MetadataEngine (modify ─ build ─ check ─ persist)   │
//! └─────────────────────────────────────────────────────────┘
//!            │                               │
//!            ▼ [cache::build]                ▼ [store]
//! ┌───────────────────────────┐   ┌─────────────────────────┐
//! │ SchemaCache + dependency  │   │ MetadataStore (memory,  │
//! │ graph + inconsistencies   │   │ SQLite, versioned)      │
//! └───────────────────────────┘   └─────────────────────────┘
//!            │
//!            ▼ [cache::reference]
//! ┌─────────────────────────────────────────────────────────┐
//! │      SchemaCacheRef: one atomic swap per rebuild        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Backend families plug in through [`backend::BackendMetadata`]; remote
//! schemas and data connector agents through the providers in
//! [`backend::remote`].

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod graphql;
pub mod inconsistency;
pub mod metadata;
pub mod schema;
pub mod store;

pub use api::{run_command, MetadataCommand};
pub use cache::{BuildContext, SchemaCache, SchemaCacheRef, SchemaCacheVer};
pub use engine::{MetadataEngine, MetadataError, MetadataResult};
pub use metadata::Metadata;
pub use store::{InMemoryMetadataStore, MetadataStore, SqliteMetadataStore};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::api::{run_command, MetadataCommand};
    pub use crate::backend::{
        BackendMetadata, BackendRegistry, DatabaseMetadata, SnapshotBackend, StaticAgentProvider,
        StaticRemoteSchemaProvider,
    };
    pub use crate::cache::{
        BuildContext, BuildReason, CacheInvalidations, SchemaCache, SchemaCacheRef, SchemaCacheVer,
    };
    pub use crate::config::{AppContext, Environment, FeatureFlags, Settings};
    pub use crate::engine::{MetadataEngine, MetadataError, MetadataResult, ReloadMetadata};
    pub use crate::inconsistency::{InconsistencyReport, InconsistentMetadata};
    pub use crate::metadata::names::*;
    pub use crate::metadata::{BackendKind, Metadata};
    pub use crate::schema::{MetadataObjId, SchemaObjId};
    pub use crate::store::{InMemoryMetadataStore, MetadataStore, SqliteMetadataStore};
}
