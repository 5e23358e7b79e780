// Integration tests for query collections, the allow list, REST endpoints
// and the OpenTelemetry configuration

#[path = "../common/mod.rs"]
mod common;

use common::*;
use schemacache::engine::{ErrorClass, ErrorCode};
use schemacache::graphql::document::OperationKind;
use schemacache::inconsistency::InconsistentMetadata;
use schemacache::metadata::names::*;
use schemacache::schema::MetadataObjId;
use schemacache::{run_command, MetadataCommand, MetadataEngine, MetadataResult};
use serde_json::{json, Value};

async fn run(engine: &MetadataEngine, command: Value) -> MetadataResult<Value> {
    let command: MetadataCommand = serde_json::from_value(command).unwrap();
    run_command(engine, command).await
}

fn collection(name: &str, queries: Value) -> Value {
    json!({
        "type": "create_query_collection",
        "args": { "name": name, "definition": { "queries": queries } }
    })
}

fn endpoint(name: &str, url: &str, methods: Value, query: &str) -> Value {
    json!({
        "type": "create_rest_endpoint",
        "args": {
            "name": name,
            "url": url,
            "methods": methods,
            "definition": { "query": { "collection_name": "saved", "query_name": query } }
        }
    })
}

/// An engine with a `saved` collection holding a few valid queries.
async fn engine_with_saved(fixture: &Fixture) -> MetadataEngine {
    let engine = fixture.engine(blog_metadata()).await;
    run(
        &engine,
        collection(
            "saved",
            json!([
                { "name": "authors", "query": "query Authors { author { id name } }" },
                { "name": "author_by_id", "query": "query AuthorById($id: Int!) { author_by_pk(id: $id) { name } }" },
                { "name": "new_article", "query": "mutation NewArticle { insert_article_one(object: {}) { id } }" },
                { "name": "live", "query": "subscription Live { article { id } }" },
                { "name": "both", "query": "query A { author { id } } query B { article { id } }" }
            ]),
        ),
    )
    .await
    .unwrap();
    engine
}

#[tokio::test]
async fn test_saved_queries_are_analyzed() {
    let fixture = Fixture::new();
    let engine = engine_with_saved(&fixture).await;
    let cache = engine.cache();
    assert!(cache.is_consistent());

    let saved = cache.query_collections.get(&CollectionName::new("saved")).unwrap();
    assert_eq!(saved.queries.len(), 5);

    let authors = saved.queries.get(&QueryName::new("authors")).unwrap();
    assert_eq!(authors.operations.len(), 1);
    assert_eq!(authors.operations[0].kind, OperationKind::Query);
    assert!(authors.operations[0].root_fields.contains("author"));

    let both = saved.queries.get(&QueryName::new("both")).unwrap();
    assert_eq!(both.operations.len(), 2);

    let value = serde_json::to_value(saved).unwrap();
    let operation = &value["queries"]["authors"]["operations"][0];
    assert_eq!(operation["kind"], json!("query"));
    assert_eq!(operation["root_fields"], json!(["author"]));
    assert_eq!(
        value["queries"]["live"]["operations"][0]["kind"],
        json!("subscription")
    );
}

#[tokio::test]
async fn test_query_against_a_missing_root_field() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    let version = engine.cache_ref().version();

    let err = run(
        &engine,
        collection("broken", json!([{ "name": "comments", "query": "{ comment { id } }" }])),
    )
    .await
    .unwrap_err();

    // The failing query is nested in the collection, not the collection itself
    assert_eq!(err.code, ErrorCode::InconsistentMetadata);
    assert_eq!(err.class, ErrorClass::Collateral);
    let internal = err.internal.unwrap();
    assert_eq!(internal[0]["type"], json!("query"));
    assert_eq!(
        internal[0]["reason"],
        json!("field \"comment\" not found in type: 'query_root'")
    );

    assert_eq!(engine.cache_ref().version(), version);
    assert!(engine.metadata().query_collections.is_empty());
}

#[tokio::test]
async fn test_failed_query_reports_who_uses_it() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(blog_tables())],
        "query_collections": [
            {
                "name": "saved",
                "definition": {
                    "queries": [{ "name": "comments", "query": "query Comments { comment { id } }" }]
                }
            }
        ],
        "allowlist": [{ "collection": "saved" }],
        "rest_endpoints": [
            {
                "name": "comments",
                "url": "comments",
                "methods": ["GET"],
                "definition": { "query": { "collection_name": "saved", "query_name": "comments" } }
            }
        ]
    }));

    let cache = fixture.build(&metadata).await.cache;

    let query_id = MetadataObjId::Query {
        collection: CollectionName::new("saved"),
        query: QueryName::new("comments"),
    };
    let query_entry = cache
        .inconsistent_objects
        .iter()
        .find(|e| e.involves(&query_id))
        .unwrap();
    assert_eq!(
        query_entry.to_json()["context"],
        json!({ "allowlist": ["saved"], "rest_endpoints": ["comments"] })
    );

    // The collection and its allow list entry survive, the endpoint does not
    assert!(cache.query_collections.contains_key(&CollectionName::new("saved")));
    assert!(cache.allowlist.contains_key(&CollectionName::new("saved")));
    assert!(cache.endpoints.is_empty());

    let endpoint_id = MetadataObjId::Endpoint {
        name: EndpointName::new("comments"),
    };
    let endpoint_entry = cache
        .inconsistent_objects
        .iter()
        .find(|e| e.involves(&endpoint_id))
        .unwrap();
    assert_eq!(
        endpoint_entry.reason(),
        "query with name \"comments\" not found in collection \"saved\""
    );
}

#[tokio::test]
async fn test_allowlist() {
    let fixture = Fixture::new();
    let engine = engine_with_saved(&fixture).await;

    let err = run(
        &engine,
        json!({ "type": "add_collection_to_allowlist", "args": { "collection": "ghost" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);

    run(
        &engine,
        json!({ "type": "add_collection_to_allowlist", "args": { "collection": "saved" } }),
    )
    .await
    .unwrap();
    let scope = engine
        .cache()
        .allowlist
        .get(&CollectionName::new("saved"))
        .cloned()
        .unwrap();
    assert!(scope.global);

    let err = run(
        &engine,
        json!({ "type": "add_collection_to_allowlist", "args": { "collection": "saved" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    run(
        &engine,
        json!({ "type": "drop_collection_from_allowlist", "args": { "collection": "saved" } }),
    )
    .await
    .unwrap();
    assert!(engine.cache().allowlist.is_empty());
}

#[tokio::test]
async fn test_allowlist_entry_for_a_missing_collection() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "allowlist": [{ "collection": "ghost" }]
    }));

    let cache = fixture.build(&metadata).await.cache;
    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert_eq!(
        cache.inconsistent_objects[0].reason(),
        "no such query collection exists: ghost"
    );
    assert!(cache.allowlist.is_empty());
}

#[tokio::test]
async fn test_rest_endpoints() {
    let fixture = Fixture::new();
    let engine = engine_with_saved(&fixture).await;

    run(&engine, endpoint("author", "authors/:id", json!(["GET"]), "author_by_id"))
        .await
        .unwrap();
    run(&engine, endpoint("new_article", "articles", json!(["POST"]), "new_article"))
        .await
        .unwrap();

    let cache = engine.cache();
    let author = cache.endpoints.get(&EndpointName::new("author")).unwrap();
    assert_eq!(author.operation, OperationKind::Query);
    assert_eq!(author.query.query_name, QueryName::new("author_by_id"));
    let new_article = cache.endpoints.get(&EndpointName::new("new_article")).unwrap();
    assert_eq!(new_article.operation, OperationKind::Mutation);
    assert_eq!(serde_json::to_value(author).unwrap()["operation"], json!("query"));
    assert_eq!(
        serde_json::to_value(new_article).unwrap()["operation"],
        json!("mutation")
    );

    let err = run(&engine, endpoint("live", "live", json!(["GET"]), "live"))
        .await
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert_eq!(
        err.message,
        "Inconsistent object: subscriptions cannot be served from REST endpoints"
    );

    let err = run(&engine, endpoint("both", "both", json!(["GET"]), "both"))
        .await
        .unwrap_err();
    assert!(err.message.contains("exactly one operation"));

    let err = run(&engine, endpoint("missing", "missing", json!(["GET"]), "nope"))
        .await
        .unwrap_err();
    assert_eq!(
        err.message,
        "Inconsistent object: query with name \"nope\" not found in collection \"saved\""
    );

    run(&engine, json!({ "type": "drop_rest_endpoint", "args": { "name": "author" } }))
        .await
        .unwrap();
    assert!(!engine.cache().endpoints.contains_key(&EndpointName::new("author")));
    let err = run(&engine, json!({ "type": "drop_rest_endpoint", "args": { "name": "author" } }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_conflicting_endpoint_routes() {
    let fixture = Fixture::new();
    let engine = engine_with_saved(&fixture).await;

    run(&engine, endpoint("by_id", "authors/:id", json!(["GET"]), "author_by_id"))
        .await
        .unwrap();

    // Same route shape on another method is fine
    run(&engine, endpoint("create", "authors/:author_id", json!(["POST"]), "new_article"))
        .await
        .unwrap();

    let err = run(
        &engine,
        endpoint("by_author_id", "authors/:author_id", json!(["GET"]), "author_by_id"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert_eq!(
        err.message,
        "Inconsistent object: conflicting definitions for REST endpoint route GET authors/:"
    );
    assert_eq!(engine.cache().endpoints.len(), 2);
}

#[tokio::test]
async fn test_conflicting_routes_in_a_document() {
    let fixture = Fixture::new();
    let route = |name: &str| {
        json!({
            "name": name,
            "url": "authors",
            "methods": ["GET"],
            "definition": { "query": { "collection_name": "saved", "query_name": "authors" } }
        })
    };
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(blog_tables())],
        "query_collections": [
            {
                "name": "saved",
                "definition": { "queries": [{ "name": "authors", "query": "{ author { id } }" }] }
            }
        ],
        "rest_endpoints": [route("first"), route("second")]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    let entry = &cache.inconsistent_objects[0];
    assert!(matches!(entry, InconsistentMetadata::Conflicting { .. }));
    assert_eq!(entry.object_ids().len(), 2);
    assert!(cache.endpoints.is_empty());
}

#[tokio::test]
async fn test_drop_query_collection_in_use() {
    let fixture = Fixture::new();
    let engine = engine_with_saved(&fixture).await;
    run(
        &engine,
        json!({ "type": "add_collection_to_allowlist", "args": { "collection": "saved" } }),
    )
    .await
    .unwrap();
    run(&engine, endpoint("authors", "authors", json!(["GET"]), "authors"))
        .await
        .unwrap();

    let drop = |cascade: bool| {
        json!({
            "type": "drop_query_collection",
            "args": { "collection": "saved", "cascade": cascade }
        })
    };

    let err = run(&engine, drop(false)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyError);
    assert_eq!(err.status(), 400);
    assert!(err.message.contains("allowlist saved"));
    assert!(err.message.contains("rest endpoint authors"));
    assert_eq!(engine.metadata().query_collections.len(), 1);

    run(&engine, drop(true)).await.unwrap();
    let cache = engine.cache();
    assert!(cache.is_consistent());
    assert!(cache.query_collections.is_empty());
    assert!(cache.allowlist.is_empty());
    assert!(cache.endpoints.is_empty());

    let metadata = engine.metadata();
    assert!(metadata.allowlist.is_empty());
    assert!(metadata.rest_endpoints.is_empty());

    let err = run(&engine, drop(false)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_opentelemetry_config() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "set_opentelemetry_config",
            "args": {
                "status": "enabled",
                "data_types": ["traces"],
                "exporter_otlp": { "otlp_traces_endpoint": "collector:4318" }
            }
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err.message.contains("must be an http or https URL"));
    assert!(engine.cache().opentelemetry.is_none());

    run(
        &engine,
        json!({
            "type": "set_opentelemetry_config",
            "args": {
                "status": "enabled",
                "data_types": ["traces"],
                "exporter_otlp": { "otlp_traces_endpoint": "http://collector:4318/v1/traces" }
            }
        }),
    )
    .await
    .unwrap();
    assert!(engine.cache().opentelemetry.is_some());
    assert!(engine.metadata().opentelemetry.is_some());
}
