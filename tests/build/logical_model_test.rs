// Integration tests for logical models and native queries

#[path = "../common/mod.rs"]
mod common;

use common::*;
use schemacache::config::{AppContext, Environment, FeatureFlags};
use schemacache::engine::{ErrorClass, ErrorCode};
use schemacache::inconsistency::InconsistentMetadata;
use schemacache::metadata::names::*;
use schemacache::schema::{DependencyReason, MetadataObjId, SchemaDependency, SchemaObjId};
use schemacache::{run_command, MetadataCommand, MetadataEngine, MetadataResult};
use serde_json::{json, Value};

fn default() -> SourceName {
    SourceName::new("default")
}

async fn run(engine: &MetadataEngine, command: Value) -> MetadataResult<Value> {
    let command: MetadataCommand = serde_json::from_value(command).unwrap();
    run_command(engine, command).await
}

fn summary_model() -> Value {
    json!({
        "name": "article_summary",
        "fields": [
            { "name": "id", "type": { "scalar": "integer" } },
            { "name": "title", "type": { "scalar": "text", "nullable": true } }
        ],
        "select_permissions": [
            { "role": "user", "permission": { "columns": ["title"], "filter": { "id": { "_gt": 0 } } } }
        ]
    })
}

fn summaries_query() -> Value {
    json!({
        "root_field_name": "article_summaries",
        "code": "SELECT id, title FROM article WHERE author_id = {{author}}",
        "returns": "article_summary",
        "arguments": { "author": { "type": "integer" } }
    })
}

async fn engine_with_summaries(fixture: &Fixture) -> MetadataEngine {
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, json!({ "type": "track_logical_model", "args": summary_model() }))
        .await
        .unwrap();
    run(&engine, json!({ "type": "track_native_query", "args": summaries_query() }))
        .await
        .unwrap();
    engine
}

#[tokio::test]
async fn test_track_logical_model_and_native_query() {
    let fixture = Fixture::new();
    let engine = engine_with_summaries(&fixture).await;
    let cache = engine.cache();
    assert!(cache.is_consistent());

    let source = cache.source(&default()).unwrap();
    let model = source
        .logical_models
        .get(&LogicalModelName::new("article_summary"))
        .unwrap();
    assert_eq!(model.fields.len(), 2);
    assert!(model.permissions.contains_key(&RoleName::new("user")));

    let query_name = NativeQueryName::new("article_summaries");
    let query = source.native_queries.get(&query_name).unwrap();
    assert_eq!(query.arguments.get("author"), Some(&ScalarType::new("integer")));

    let query_id = MetadataObjId::native_query(&default(), &query_name);
    assert_eq!(cache.root_fields.query.get("article_summaries"), Some(&query_id));

    let deps = cache
        .dependencies
        .dependencies_of(&query_id.schema_obj_id().unwrap());
    assert!(deps.contains(&SchemaDependency::new(
        SchemaObjId::logical_model(&default(), &LogicalModelName::new("article_summary")),
        DependencyReason::LogicalModel,
    )));
}

#[tokio::test]
async fn test_undeclared_native_query_argument() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, json!({ "type": "track_logical_model", "args": summary_model() }))
        .await
        .unwrap();

    let mut query = summaries_query();
    query["code"] = json!("SELECT id, title FROM article WHERE author_id = {{author}} LIMIT {{ limit }}");
    let err = run(&engine, json!({ "type": "track_native_query", "args": query }))
        .await
        .unwrap_err();

    assert_eq!(err.class, ErrorClass::Targeted);
    assert_eq!(err.message, "Inconsistent object: undeclared arguments: \"limit\"");
    assert!(engine
        .cache()
        .source(&default())
        .unwrap()
        .native_queries
        .is_empty());
}

#[tokio::test]
async fn test_native_query_needs_a_known_model() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(&engine, json!({ "type": "track_native_query", "args": summaries_query() }))
        .await
        .unwrap_err();
    assert_eq!(
        err.message,
        "Inconsistent object: no such logical model exists: \"article_summary\""
    );
}

#[tokio::test]
async fn test_logical_model_field_types() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "track_logical_model",
            "args": {
                "name": "priced",
                "fields": [{ "name": "price", "type": { "scalar": "money" } }]
            }
        }),
    )
    .await
    .unwrap_err();
    assert!(err
        .message
        .contains("field \"price\" has unknown scalar type \"money\""));

    let err = run(
        &engine,
        json!({
            "type": "track_logical_model",
            "args": {
                "name": "person",
                "fields": [{ "name": "home", "type": { "logical_model": "address" } }]
            }
        }),
    )
    .await
    .unwrap_err();
    assert!(err.message.contains("no such logical model exists: \"address\""));
}

#[tokio::test]
async fn test_nested_logical_models() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(
        &engine,
        json!({
            "type": "track_logical_model",
            "args": { "name": "address", "fields": [{ "name": "city", "type": { "scalar": "text" } }] }
        }),
    )
    .await
    .unwrap();
    run(
        &engine,
        json!({
            "type": "track_logical_model",
            "args": {
                "name": "person",
                "fields": [
                    { "name": "id", "type": { "scalar": "integer" } },
                    { "name": "addresses", "type": { "array": { "logical_model": "address" } } }
                ]
            }
        }),
    )
    .await
    .unwrap();

    // address is referenced by person
    let err = run(
        &engine,
        json!({ "type": "untrack_logical_model", "args": { "name": "address" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyError);
    assert!(err.message.contains("logical model person"));

    run(&engine, json!({ "type": "untrack_logical_model", "args": { "name": "person" } }))
        .await
        .unwrap();
    run(&engine, json!({ "type": "untrack_logical_model", "args": { "name": "address" } }))
        .await
        .unwrap();
    assert!(engine.cache().source(&default()).unwrap().logical_models.is_empty());
}

#[tokio::test]
async fn test_untrack_model_in_use() {
    let fixture = Fixture::new();
    let engine = engine_with_summaries(&fixture).await;

    let err = run(
        &engine,
        json!({ "type": "untrack_logical_model", "args": { "name": "article_summary" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyError);
    assert!(err.message.contains("dependent objects exist"));

    run(
        &engine,
        json!({ "type": "untrack_native_query", "args": { "root_field_name": "article_summaries" } }),
    )
    .await
    .unwrap();
    run(
        &engine,
        json!({ "type": "untrack_logical_model", "args": { "name": "article_summary" } }),
    )
    .await
    .unwrap();

    let cache = engine.cache();
    assert!(cache.is_consistent());
    assert!(!cache.root_fields.query.contains_key("article_summaries"));
}

#[tokio::test]
async fn test_native_query_root_field_conflict() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, json!({ "type": "track_logical_model", "args": summary_model() }))
        .await
        .unwrap();

    let mut query = summaries_query();
    query["root_field_name"] = json!("author");
    let err = run(&engine, json!({ "type": "track_native_query", "args": query }))
        .await
        .unwrap_err();
    assert!(err
        .message
        .contains("conflicting definitions for field \"author\" of type \"query_root\""));

    // The table keeps its root field
    assert_eq!(
        engine.cache().root_fields.query.get("author"),
        Some(&MetadataObjId::table(&default(), &TableName::new("author")))
    );
}

#[tokio::test]
async fn test_disabled_features_mark_objects_inconsistent() {
    let features = FeatureFlags {
        native_queries: false,
        ..FeatureFlags::default()
    };
    let fixture = Fixture::new().with_app(AppContext::new(features, Environment::default()));

    let mut document = serde_json::to_value(blog_metadata()).unwrap();
    document["sources"][0]["logical_models"] = json!([summary_model()]);
    document["sources"][0]["native_queries"] = json!([summaries_query()]);
    let cache = fixture.build(&metadata(document)).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    let entry = &cache.inconsistent_objects[0];
    assert!(matches!(entry, InconsistentMetadata::Object { .. }));
    assert_eq!(entry.reason(), "native queries are disabled");

    let source = cache.source(&default()).unwrap();
    assert_eq!(source.logical_models.len(), 1);
    assert!(source.native_queries.is_empty());
}
