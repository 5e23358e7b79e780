// Shared fixtures for the integration tests: an author/article database,
// metadata documents over it, and engines wired to in-memory collaborators.
#![allow(dead_code)]

use std::sync::Arc;

use schemacache::backend::{
    BackendRegistry, DatabaseMetadata, RemoteIntrospection, SnapshotBackend, StaticAgentProvider,
    StaticRemoteSchemaProvider,
};
use schemacache::cache::{
    build_schema_cache, BuildArtifacts, BuildContext, BuildInputs, BuildOutput, BuildReason,
    CacheInvalidations,
};
use schemacache::config::AppContext;
use schemacache::metadata::{BackendKind, Metadata};
use schemacache::store::{InMemoryMetadataStore, MetadataStore};
use schemacache::MetadataEngine;
use serde_json::{json, Value};

pub const REMOTE_URL: &str = "http://countries.example/graphql";

/// `author(id, name)` and `article(id, title, author_id)` with
/// `article.author_id` referencing `author.id`.
pub fn blog_database() -> DatabaseMetadata {
    serde_json::from_value(json!({
        "tables": [
            {
                "name": "author",
                "columns": [
                    { "name": "id", "type": "integer", "position": 1 },
                    { "name": "name", "type": "text", "is_nullable": true, "position": 2 }
                ],
                "primary_key": { "constraint": "author_pkey", "columns": ["id"] }
            },
            {
                "name": "article",
                "columns": [
                    { "name": "id", "type": "integer", "position": 1 },
                    { "name": "title", "type": "text", "position": 2 },
                    { "name": "author_id", "type": "integer", "position": 3 }
                ],
                "primary_key": { "constraint": "article_pkey", "columns": ["id"] },
                "foreign_keys": [
                    {
                        "constraint": "article_author_id_fkey",
                        "foreign_table": "author",
                        "column_mapping": { "author_id": "id" }
                    }
                ]
            }
        ],
        "scalars": ["integer", "text", "boolean", "timestamptz"]
    }))
    .unwrap()
}

/// A postgres source named `default`.
pub fn default_source(tables: Value) -> Value {
    json!({
        "name": "default",
        "kind": "postgres",
        "configuration": {
            "connection_info": { "database_url": "postgres://localhost:5432/blog" }
        },
        "tables": tables
    })
}

/// Both tables tracked, linked both ways through the foreign key.
pub fn blog_tables() -> Value {
    json!([
        {
            "table": "author",
            "array_relationships": [
                {
                    "name": "articles",
                    "using": {
                        "foreign_key_constraint_on": { "table": "article", "columns": "author_id" }
                    }
                }
            ]
        },
        {
            "table": "article",
            "object_relationships": [
                {
                    "name": "author_by_author_id",
                    "using": { "foreign_key_constraint_on": "author_id" }
                }
            ]
        }
    ])
}

pub fn metadata(document: Value) -> Metadata {
    serde_json::from_value(document).unwrap()
}

/// The document with the blog tables tracked and related.
pub fn blog_metadata() -> Metadata {
    metadata(json!({
        "version": 3,
        "sources": [default_source(blog_tables())]
    }))
}

pub fn countries_schema() -> RemoteIntrospection {
    RemoteIntrospection {
        query_root: ["countries".to_string(), "country".to_string()].into(),
        mutation_root: Default::default(),
        types: ["Country".to_string()].into(),
    }
}

/// In-memory collaborators of a build, kept around so tests can change
/// what the "databases" answer between builds.
pub struct Fixture {
    pub backend: Arc<SnapshotBackend>,
    pub remote_schemas: Arc<StaticRemoteSchemaProvider>,
    pub agents: Arc<StaticAgentProvider>,
    pub app: AppContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(SnapshotBackend::postgres().with_database("default", blog_database())),
            remote_schemas: Arc::new(
                StaticRemoteSchemaProvider::new().with_schema(REMOTE_URL, countries_schema()),
            ),
            agents: Arc::new(StaticAgentProvider::new()),
            app: AppContext::default(),
        }
    }

    pub fn with_app(mut self, app: AppContext) -> Self {
        self.app = app;
        self
    }

    pub fn context(&self) -> BuildContext {
        BuildContext {
            app: self.app.clone(),
            backends: BackendRegistry::new().with_backend(BackendKind::Postgres, self.backend.clone()),
            remote_schemas: self.remote_schemas.clone(),
            agents: self.agents.clone(),
        }
    }

    /// One standalone build with no previous artifacts.
    pub async fn build(&self, metadata: &Metadata) -> BuildOutput {
        self.build_after(metadata, &BuildArtifacts::default()).await
    }

    /// A build that may reuse what `previous` fetched.
    pub async fn build_after(&self, metadata: &Metadata, previous: &BuildArtifacts) -> BuildOutput {
        build_schema_cache(
            BuildInputs {
                metadata,
                resource_version: 0,
                reason: &BuildReason::update_all(),
                invalidations: &CacheInvalidations::none(),
                previous,
            },
            &self.context(),
        )
        .await
    }

    /// An engine over an in-memory store holding `metadata`.
    pub async fn engine(&self, metadata: Metadata) -> MetadataEngine {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::with_metadata(metadata));
        self.engine_with_store(store).await
    }

    pub async fn engine_with_store(&self, store: Arc<dyn MetadataStore>) -> MetadataEngine {
        MetadataEngine::builder(store, self.context())
            .initialise()
            .await
            .unwrap()
    }
}
