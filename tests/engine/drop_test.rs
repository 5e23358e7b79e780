// Integration tests for dropping objects: dependency errors, cascades,
// source cleanup and event trigger installation

#[path = "../common/mod.rs"]
mod common;

use common::*;
use schemacache::cache::SchemaCacheVer;
use schemacache::engine::{ErrorClass, ErrorCode};
use schemacache::metadata::names::*;
use schemacache::metadata::PermType;
use schemacache::{run_command, MetadataCommand, MetadataEngine, MetadataResult};
use serde_json::{json, Value};

fn default() -> SourceName {
    SourceName::new("default")
}

async fn run(engine: &MetadataEngine, command: Value) -> MetadataResult<Value> {
    let command: MetadataCommand = serde_json::from_value(command).unwrap();
    run_command(engine, command).await
}

fn untrack(table: &str, cascade: bool) -> Value {
    json!({ "type": "untrack_table", "args": { "table": table, "cascade": cascade } })
}

fn article_created() -> Value {
    json!({
        "type": "create_event_trigger",
        "args": {
            "table": "article",
            "name": "article_created",
            "definition": { "insert": { "columns": "*" } },
            "webhook": "http://hooks.example/articles"
        }
    })
}

#[tokio::test]
async fn test_untrack_table_with_dependents() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    let before = engine.metadata();

    let err = run(&engine, untrack("author", false)).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::DependencyError);
    assert_eq!(err.class, ErrorClass::User);
    assert_eq!(
        err.message,
        "cannot drop, dependent objects exist: object relation author_by_author_id in table article in source default"
    );
    assert_eq!(engine.metadata(), before);
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(0));
}

#[tokio::test]
async fn test_untrack_table_cascade() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(&engine, untrack("author", true)).await.unwrap();

    let cache = engine.cache();
    assert!(cache.is_consistent());
    assert!(cache.table(&default(), &TableName::new("author")).is_none());
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article.relationships.is_empty());
    assert!(!cache.root_fields.query.contains_key("author"));

    let metadata = engine.metadata();
    let source = metadata.source(&default()).unwrap();
    assert!(source.table(&TableName::new("author")).is_none());
    assert!(source
        .table(&TableName::new("article"))
        .unwrap()
        .object_relationships
        .is_empty());

    // Nothing left to untrack
    let err = run(&engine, untrack("author", false)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_untrack_table_ignores_its_own_objects() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(
        &engine,
        json!({
            "type": "create_select_permission",
            "args": { "table": "author", "role": "user", "permission": { "columns": ["id", "name"] } }
        }),
    )
    .await
    .unwrap();

    // author's permission and its own relationship go with it; only the
    // relationship on article is a dependent
    let err = run(&engine, untrack("author", false)).await.unwrap_err();
    assert!(!err.message.contains("permission"));
    assert!(!err.message.contains("articles"));
}

#[tokio::test]
async fn test_drop_relationship_used_by_a_permission() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(
        &engine,
        json!({
            "type": "create_select_permission",
            "args": {
                "table": "article",
                "role": "user",
                "permission": {
                    "columns": "*",
                    "filter": { "author_by_author_id": { "id": { "_eq": 1 } } }
                }
            }
        }),
    )
    .await
    .unwrap();

    let drop = |cascade: bool| {
        json!({
            "type": "drop_relationship",
            "args": { "table": "article", "relationship": "author_by_author_id", "cascade": cascade }
        })
    };

    let err = run(&engine, drop(false)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyError);
    assert!(err
        .message
        .contains("select permission user in table article in source default"));

    run(&engine, drop(true)).await.unwrap();
    let cache = engine.cache();
    assert!(cache.is_consistent());
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article.relationships.is_empty());
    assert!(!article.permission(&RoleName::new("user"), PermType::Select));
}

#[tokio::test]
async fn test_drop_source_runs_cleanup() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(&engine, json!({ "type": "drop_source", "args": { "name": "default" } }))
        .await
        .unwrap();

    assert_eq!(fixture.backend.dropped_sources(), vec![default()]);
    let cache = engine.cache();
    assert!(cache.sources.is_empty());
    assert!(cache.root_fields.query.is_empty());
    assert!(engine.metadata().sources.is_empty());

    let err = run(&engine, json!({ "type": "drop_source", "args": { "name": "default" } }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_drop_unresolved_source_skips_cleanup() {
    let fixture = Fixture::new();
    fixture.backend.set_unreachable("default", true);
    let engine = fixture.engine(blog_metadata()).await;
    assert!(engine.cache().source(&default()).is_none());

    run(&engine, json!({ "type": "drop_source", "args": { "name": "default" } }))
        .await
        .unwrap();

    assert!(fixture.backend.dropped_sources().is_empty());
    assert!(engine.cache().is_consistent());
}

#[tokio::test]
async fn test_drop_one_of_two_sources() {
    let fixture = Fixture::new();
    fixture.backend.set_database("analytics", blog_database());
    let engine = fixture.engine(blog_metadata()).await;
    run(
        &engine,
        json!({
            "type": "add_source",
            "args": {
                "name": "analytics",
                "kind": "postgres",
                "configuration": {
                    "connection_info": { "database_url": "postgres://localhost:5432/analytics" }
                }
            }
        }),
    )
    .await
    .unwrap();

    // The other source is independent of default
    run(&engine, json!({ "type": "drop_source", "args": { "name": "analytics" } }))
        .await
        .unwrap();
    assert!(engine.cache().source(&default()).is_some());
    assert_eq!(
        fixture.backend.dropped_sources(),
        vec![SourceName::new("analytics")]
    );
}

#[tokio::test]
async fn test_event_triggers_install_on_source_changes_only() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    assert!(fixture.backend.installed_triggers().is_empty());

    run(&engine, article_created()).await.unwrap();
    assert_eq!(
        fixture.backend.installed_triggers(),
        vec![(
            default(),
            TableName::new("article"),
            TriggerName::new("article_created")
        )]
    );

    // A metadata-only change leaves the database alone
    run(
        &engine,
        json!({
            "type": "create_query_collection",
            "args": { "name": "saved", "definition": { "queries": [] } }
        }),
    )
    .await
    .unwrap();
    assert_eq!(fixture.backend.installed_triggers().len(), 1);

    // Asking for it reinstalls
    run(
        &engine,
        json!({ "type": "reload_metadata", "args": { "recreate_event_triggers": true } }),
    )
    .await
    .unwrap();
    assert_eq!(fixture.backend.installed_triggers().len(), 2);

    let err = run(&engine, article_created()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
}

#[tokio::test]
async fn test_invalid_event_trigger() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "create_event_trigger",
            "args": {
                "table": "article",
                "name": "article created",
                "definition": { "insert": { "columns": "*" } },
                "webhook": "http://hooks.example/articles"
            }
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err.message.contains("may only contain letters"));

    let err = run(
        &engine,
        json!({
            "type": "create_event_trigger",
            "args": {
                "table": "article",
                "name": "article_updated",
                "definition": { "update": { "columns": ["rating"] } },
                "webhook": "http://hooks.example/articles"
            }
        }),
    )
    .await
    .unwrap_err();
    assert!(err.message.contains("column \"rating\" does not exist on table \"article\""));
    assert!(fixture.backend.installed_triggers().is_empty());
}

#[tokio::test]
async fn test_delete_event_trigger() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, article_created()).await.unwrap();

    run(
        &engine,
        json!({ "type": "delete_event_trigger", "args": { "name": "article_created" } }),
    )
    .await
    .unwrap();
    assert!(engine
        .cache()
        .table(&default(), &TableName::new("article"))
        .unwrap()
        .event_triggers
        .is_empty());

    let err = run(
        &engine,
        json!({ "type": "delete_event_trigger", "args": { "name": "article_created" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}
