// Integration tests for building a schema cache from a metadata document

#[path = "../common/mod.rs"]
mod common;

use common::*;
use schemacache::inconsistency::InconsistentMetadata;
use schemacache::metadata::names::*;
use schemacache::schema::MetadataObjId;
use schemacache::{run_command, MetadataCommand};
use serde_json::json;

fn default() -> SourceName {
    SourceName::new("default")
}

#[tokio::test]
async fn test_blog_metadata_builds_consistently() {
    let fixture = Fixture::new();
    let out = fixture.build(&blog_metadata()).await;
    let cache = out.cache;

    assert!(cache.is_consistent(), "unexpected: {:?}", cache.inconsistent_objects);

    let author = cache.table(&default(), &TableName::new("author")).unwrap();
    assert_eq!(author.columns.len(), 2);
    assert!(author.relationships.contains_key(&RelName::new("articles")));

    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article
        .relationships
        .contains_key(&RelName::new("author_by_author_id")));

    // Generated root fields
    for field in ["author", "author_by_pk", "author_aggregate", "article", "article_by_pk"] {
        assert!(cache.root_fields.query.contains_key(field), "missing query field {}", field);
    }
    for field in ["insert_author", "insert_author_one", "update_article_by_pk", "delete_article"] {
        assert!(cache.root_fields.mutation.contains_key(field), "missing mutation field {}", field);
    }
    assert_eq!(
        cache.root_fields.query.get("article"),
        Some(&MetadataObjId::table(&default(), &TableName::new("article")))
    );
}

#[tokio::test]
async fn test_build_is_deterministic() {
    let fixture = Fixture::new();
    let metadata = blog_metadata();

    let first = fixture.build(&metadata).await.cache;
    let second = fixture.build(&metadata).await.cache;

    assert_eq!(first.summary(), second.summary());
    assert_eq!(first.inconsistent_objects, second.inconsistent_objects);
    assert_eq!(first.dependencies.edges(), second.dependencies.edges());
}

#[tokio::test]
async fn test_untracked_database_table_is_inconsistent() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            { "table": "comment" }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    let entry = &cache.inconsistent_objects[0];
    assert!(entry.involves(&MetadataObjId::table(&default(), &TableName::new("comment"))));
    assert_eq!(
        entry.reason(),
        "no such table/view exists in source: \"comment\""
    );

    // The rest of the source is unaffected
    assert!(cache.table(&default(), &TableName::new("author")).is_some());
    assert!(cache.table(&default(), &TableName::new("comment")).is_none());
}

#[tokio::test]
async fn test_unknown_custom_column_type() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            {
                "table": "author",
                "configuration": {
                    "column_config": { "name": { "custom_type": "Citext" } }
                }
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert_eq!(
        cache.inconsistent_objects[0].reason(),
        "the custom type \"Citext\" of column \"name\" is not a scalar type known to source \"default\""
    );
}

#[tokio::test]
async fn test_known_custom_column_type_is_applied() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            {
                "table": "author",
                "configuration": {
                    "custom_name": "writer",
                    "column_config": { "name": { "custom_type": "timestamptz" } }
                }
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;
    assert!(cache.is_consistent());

    let author = cache.table(&default(), &TableName::new("author")).unwrap();
    assert_eq!(author.graphql_name, "writer");
    assert_eq!(
        author.column(&ColumnName::new("name")).unwrap().column_type,
        ScalarType::new("timestamptz")
    );
    assert!(cache.root_fields.query.contains_key("writer_by_pk"));
    assert!(!cache.root_fields.query.contains_key("author"));
}

#[tokio::test]
async fn test_conflicting_root_fields_evict_every_owner() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            {
                "table": "author",
                "configuration": { "custom_root_fields": { "select": "article" } }
            },
            { "table": "article" }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    let conflicts: Vec<&InconsistentMetadata> = cache
        .inconsistent_objects
        .iter()
        .filter(|e| matches!(e, InconsistentMetadata::Conflicting { .. }))
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].reason(),
        "conflicting definitions for field \"article\" of type \"query_root\""
    );

    let author = MetadataObjId::table(&default(), &TableName::new("author"));
    let article = MetadataObjId::table(&default(), &TableName::new("article"));
    assert!(conflicts[0].involves(&author));
    assert!(conflicts[0].involves(&article));

    assert!(cache.table(&default(), &TableName::new("author")).is_none());
    assert!(cache.table(&default(), &TableName::new("article")).is_none());
    assert!(!cache.root_fields.query.contains_key("article"));
    assert!(!cache.root_fields.query.values().any(|owner| owner == &author || owner == &article));
}

#[tokio::test]
async fn test_duplicate_table_definitions() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            { "table": "author", "configuration": { "custom_name": "writer" } }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert!(cache
        .inconsistent_objects
        .iter()
        .any(|e| matches!(e, InconsistentMetadata::Duplicate { .. })));
    assert!(cache.table(&default(), &TableName::new("author")).is_none());
}

#[tokio::test]
async fn test_unreachable_source_is_inconsistent() {
    let fixture = Fixture::new();
    fixture.backend.set_unreachable("default", true);

    let cache = fixture.build(&blog_metadata()).await.cache;

    let source = MetadataObjId::source(&default());
    let entry = cache
        .inconsistent_objects
        .iter()
        .find(|e| e.involves(&source))
        .expect("source should be inconsistent");
    assert!(entry.reason().contains("could not connect to source \"default\""));
    assert!(cache.source(&default()).is_none());
    assert!(cache.root_fields.query.is_empty());
}

#[tokio::test]
async fn test_missing_connection_info() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [{ "name": "default", "kind": "postgres", "tables": [{ "table": "author" }] }]
    }));

    let cache = fixture.build(&metadata).await.cache;
    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert!(cache.inconsistent_objects[0]
        .reason()
        .contains("connection_info is required"));
}

#[tokio::test]
async fn test_metadata_only_changes_reuse_introspection() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    assert_eq!(fixture.backend.introspection_count(), 1);

    // A query collection touches no database
    let command: MetadataCommand = serde_json::from_value(json!({
        "type": "create_query_collection",
        "args": { "name": "saved", "definition": { "queries": [] } }
    }))
    .unwrap();
    run_command(&engine, command).await.unwrap();
    assert_eq!(fixture.backend.introspection_count(), 1);

    // Tracking a table refetches its source
    let command: MetadataCommand = serde_json::from_value(json!({
        "type": "untrack_table",
        "args": { "table": "article", "cascade": true }
    }))
    .unwrap();
    run_command(&engine, command).await.unwrap();
    let command: MetadataCommand = serde_json::from_value(json!({
        "type": "track_table",
        "args": { "table": "article" }
    }))
    .unwrap();
    run_command(&engine, command).await.unwrap();
    assert!(fixture.backend.introspection_count() > 1);
}

#[tokio::test]
async fn test_remote_schema_resolution() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(blog_tables())],
        "remote_schemas": [
            { "name": "countries", "definition": { "url": REMOTE_URL } },
            { "name": "broken", "definition": { "url": "http://nowhere.example/graphql" } }
        ]
    }));

    let cache = fixture.build(&metadata).await.cache;

    let countries = RemoteSchemaName::new("countries");
    assert!(cache.remote_schemas.contains_key(&countries));
    assert_eq!(
        cache.root_fields.query.get("countries"),
        Some(&MetadataObjId::remote_schema(&countries))
    );

    assert_eq!(cache.inconsistent_objects.len(), 1);
    let entry = &cache.inconsistent_objects[0];
    assert!(entry.involves(&MetadataObjId::remote_schema(&RemoteSchemaName::new("broken"))));
    assert!(entry.reason().starts_with("inconsistent remote schema"));
}

#[tokio::test]
async fn test_remote_schema_url_from_environment() {
    let mut app = schemacache::config::AppContext::default();
    app.environment.set("COUNTRIES_URL", REMOTE_URL);
    let fixture = Fixture::new().with_app(app);

    let metadata = metadata(json!({
        "version": 3,
        "remote_schemas": [
            { "name": "countries", "definition": { "url_from_env": "COUNTRIES_URL" } },
            { "name": "unset", "definition": { "url_from_env": "NOT_SET" } }
        ]
    }));

    let cache = fixture.build(&metadata).await.cache;
    assert!(cache.remote_schemas.contains_key(&RemoteSchemaName::new("countries")));
    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert_eq!(
        cache.inconsistent_objects[0].reason(),
        "environment variable \"NOT_SET\" is not set"
    );
}
