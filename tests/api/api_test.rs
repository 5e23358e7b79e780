// Integration tests for the metadata API surface: command parsing, bulk,
// whole-document commands, remote schemas, sources and data connectors

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::*;
use schemacache::backend::{AgentInfo, StaticAgentProvider};
use schemacache::cache::SchemaCacheVer;
use schemacache::config::{AppContext, Environment, FeatureFlags};
use schemacache::engine::{ErrorClass, ErrorCode};
use schemacache::metadata::names::*;
use schemacache::metadata::{Metadata, PermType};
use schemacache::{run_command, MetadataCommand, MetadataEngine, MetadataResult};
use serde_json::{json, Value};

const AGENT_URI: &str = "http://agents.example/sqlite";

fn default() -> SourceName {
    SourceName::new("default")
}

async fn run(engine: &MetadataEngine, command: Value) -> MetadataResult<Value> {
    let command: MetadataCommand = serde_json::from_value(command).unwrap();
    run_command(engine, command).await
}

fn grant_select(table: &str, role: &str) -> Value {
    json!({
        "type": "create_select_permission",
        "args": { "table": table, "role": role, "permission": { "columns": "*" } }
    })
}

fn add_countries() -> Value {
    json!({
        "type": "add_remote_schema",
        "args": { "name": "countries", "definition": { "url": REMOTE_URL } }
    })
}

/// The blog document plus an untracked-in-the-database table and a remote
/// schema nobody answers for.
fn broken_metadata() -> Metadata {
    let mut tables = blog_tables();
    tables
        .as_array_mut()
        .unwrap()
        .push(json!({ "table": "comment" }));
    metadata(json!({
        "version": 3,
        "sources": [default_source(tables)],
        "remote_schemas": [
            { "name": "broken", "definition": { "url": "http://broken.example/graphql" } }
        ]
    }))
}

fn with_remote_permissions() -> Fixture {
    let features = FeatureFlags {
        remote_schema_permissions: true,
        ..FeatureFlags::default()
    };
    Fixture::new().with_app(AppContext::new(features, Environment::default()))
}

#[test]
fn test_parse_commands() {
    let command: MetadataCommand = serde_json::from_value(json!({
        "type": "reload_metadata",
        "args": { "reload_sources": ["default"], "recreate_event_triggers": true }
    }))
    .unwrap();
    assert_eq!(command.name(), "reload_metadata");

    let command: MetadataCommand = serde_json::from_value(json!({
        "type": "replace_metadata",
        "args": { "metadata": { "version": 3, "sources": [] } }
    }))
    .unwrap();
    match command {
        MetadataCommand::ReplaceMetadata(args) => {
            assert!(!args.allow_inconsistent_metadata);
            assert!(args.metadata.sources.is_empty());
        }
        other => panic!("unexpected command {:?}", other),
    }

    let command: MetadataCommand = serde_json::from_value(json!({
        "type": "add_data_connector",
        "args": { "name": "sqlite", "uri": AGENT_URI }
    }))
    .unwrap();
    assert_eq!(command.name(), "add_data_connector");

    let err = serde_json::from_value::<MetadataCommand>(json!({
        "type": "run_sql",
        "args": { "sql": "SELECT 1" }
    }))
    .unwrap_err();
    assert!(err.to_string().contains("run_sql"));
}

#[tokio::test]
async fn test_bulk_returns_every_result() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let results = run(
        &engine,
        json!({
            "type": "bulk",
            "args": [
                grant_select("article", "user"),
                grant_select("author", "user"),
                { "type": "get_inconsistent_metadata" }
            ]
        }),
    )
    .await
    .unwrap();

    assert_eq!(
        results,
        json!([
            { "message": "success" },
            { "message": "success" },
            { "is_consistent": true, "inconsistent_objects": [] }
        ])
    );
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(2));
}

#[tokio::test]
async fn test_bulk_stops_at_the_first_failure() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "bulk",
            "args": [
                grant_select("article", "user"),
                { "type": "track_table", "args": { "table": "ghost" } },
                grant_select("author", "user")
            ]
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);

    // Commands before the failure stay applied, those after never ran
    let cache = engine.cache();
    assert!(cache
        .table(&default(), &TableName::new("article"))
        .unwrap()
        .permission(&RoleName::new("user"), PermType::Select));
    assert!(!cache
        .table(&default(), &TableName::new("author"))
        .unwrap()
        .permission(&RoleName::new("user"), PermType::Select));
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(1));
}

#[tokio::test]
async fn test_export_metadata() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, grant_select("article", "user")).await.unwrap();

    let exported = run(&engine, json!({ "type": "export_metadata" })).await.unwrap();
    assert_eq!(exported["sources"][0]["name"], "default");

    let document: Metadata = serde_json::from_value(exported).unwrap();
    assert_eq!(document, *engine.metadata());
}

#[tokio::test]
async fn test_get_inconsistent_metadata() {
    let fixture = Fixture::new();
    let engine = fixture.engine(broken_metadata()).await;

    let report = run(&engine, json!({ "type": "get_inconsistent_metadata" }))
        .await
        .unwrap();
    assert_eq!(report["is_consistent"], false);

    let objects = report["inconsistent_objects"].as_array().unwrap();
    assert_eq!(objects.len(), 2);
    let comment = objects.iter().find(|o| o["type"] == "table").unwrap();
    assert_eq!(comment["name"], "comment in source default");
    assert_eq!(
        comment["reason"],
        "no such table/view exists in source: \"comment\""
    );
    let remote = objects.iter().find(|o| o["type"] == "remote_schema").unwrap();
    assert!(remote["reason"]
        .as_str()
        .unwrap()
        .starts_with("inconsistent remote schema: "));
}

#[tokio::test]
async fn test_drop_inconsistent_metadata() {
    let fixture = Fixture::new();
    let engine = fixture.engine(broken_metadata()).await;

    let response = run(&engine, json!({ "type": "drop_inconsistent_metadata" }))
        .await
        .unwrap();
    assert_eq!(response, json!({ "message": "success" }));

    assert!(engine.cache().is_consistent());
    let metadata = engine.metadata();
    assert!(metadata.remote_schemas.is_empty());
    let source = metadata.source(&default()).unwrap();
    assert_eq!(source.tables.len(), 2);
    assert!(source.table(&TableName::new("comment")).is_none());
}

#[tokio::test]
async fn test_replace_metadata() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    let before = engine.metadata();

    let replacement = serde_json::to_value(broken_metadata()).unwrap();
    let err = run(
        &engine,
        json!({ "type": "replace_metadata", "args": { "metadata": replacement } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InconsistentMetadata);
    assert_eq!(err.class, ErrorClass::Collateral);
    assert_eq!(err.internal.as_ref().unwrap().as_array().unwrap().len(), 2);
    assert_eq!(engine.metadata(), before);

    let response = run(
        &engine,
        json!({
            "type": "replace_metadata",
            "args": { "allow_inconsistent_metadata": true, "metadata": replacement }
        }),
    )
    .await
    .unwrap();
    assert_eq!(response["message"], "success");
    assert_eq!(response["is_consistent"], false);
    assert_eq!(response["inconsistent_objects"].as_array().unwrap().len(), 2);
    assert_eq!(engine.metadata().remote_schemas.len(), 1);
}

#[tokio::test]
async fn test_replace_metadata_rejects_duplicate_names() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "replace_metadata",
            "args": {
                "allow_inconsistent_metadata": true,
                "metadata": {
                    "version": 3,
                    "sources": [default_source(json!([{ "table": "author" }, { "table": "author" }]))]
                }
            }
        }),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    assert_eq!(err.status(), 400);
    assert_eq!(err.message, "Duplicate table name 'author' in source default");
    assert_eq!(
        err.internal,
        Some(json!(["Duplicate table name 'author' in source default"]))
    );
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(0));
}

#[tokio::test]
async fn test_reload_metadata_command() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let response = run(&engine, json!({ "type": "reload_metadata", "args": {} }))
        .await
        .unwrap();
    assert_eq!(
        response,
        json!({ "is_consistent": true, "inconsistent_objects": [], "message": "success" })
    );
}

#[tokio::test]
async fn test_error_responses() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({ "type": "untrack_table", "args": { "table": "author" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(
        serde_json::to_value(&err).unwrap(),
        json!({
            "code": "dependency-error",
            "error": "cannot drop, dependent objects exist: object relation author_by_author_id in table article in source default"
        })
    );

    let err = run(
        &engine,
        json!({ "type": "track_table", "args": { "table": "author" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
    assert_eq!(err.status(), 409);

    let err = run(
        &engine,
        json!({ "type": "drop_source", "args": { "name": "analytics" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 404);
    assert_eq!(serde_json::to_value(&err).unwrap()["code"], "not-exists");
}

#[tokio::test]
async fn test_track_missing_table() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({ "type": "track_table", "args": { "table": "comment" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert_eq!(
        err.message,
        "Inconsistent object: no such table/view exists in source: \"comment\""
    );
    assert!(engine
        .metadata()
        .source(&default())
        .unwrap()
        .table(&TableName::new("comment"))
        .is_none());
}

#[tokio::test]
async fn test_track_table_with_unknown_custom_column_type() {
    let fixture = Fixture::new();
    let engine = fixture
        .engine(metadata(json!({
            "version": 3,
            "sources": [default_source(json!([{ "table": "article" }]))]
        })))
        .await;

    let err = run(
        &engine,
        json!({
            "type": "track_table",
            "args": {
                "table": "author",
                "configuration": {
                    "column_config": { "name": { "custom_type": "Citext" } }
                }
            }
        }),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    assert_eq!(err.class, ErrorClass::Targeted);
    assert_eq!(
        err.message,
        "Inconsistent object: the custom type \"Citext\" of column \"name\" is not a scalar type known to source \"default\""
    );
    assert!(engine.cache().table(&default(), &TableName::new("author")).is_none());
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(0));
}

#[tokio::test]
async fn test_add_and_remove_remote_schema() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(&engine, add_countries()).await.unwrap();
    let countries = RemoteSchemaName::new("countries");
    let cache = engine.cache();
    assert!(cache.remote_schemas.contains_key(&countries));
    assert!(cache.root_fields.query.contains_key("country"));

    let err = run(&engine, add_countries()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    run(
        &engine,
        json!({ "type": "remove_remote_schema", "args": { "name": "countries" } }),
    )
    .await
    .unwrap();
    let cache = engine.cache();
    assert!(cache.remote_schemas.is_empty());
    assert!(!cache.root_fields.query.contains_key("country"));

    let err = run(
        &engine,
        json!({ "type": "remove_remote_schema", "args": { "name": "countries" } }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_unreachable_remote_schema() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "add_remote_schema",
            "args": { "name": "weather", "definition": { "url": "http://weather.example/graphql" } }
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err.message.starts_with("Inconsistent object: inconsistent remote schema: "));
    assert!(engine.metadata().remote_schemas.is_empty());

    let err = run(
        &engine,
        json!({
            "type": "add_remote_schema",
            "args": { "name": "weather", "definition": { "url_from_env": "WEATHER_URL" } }
        }),
    )
    .await
    .unwrap_err();
    assert!(err
        .message
        .contains("environment variable \"WEATHER_URL\" is not set"));
}

#[tokio::test]
async fn test_remote_schema_root_field_conflict() {
    let fixture = Fixture::new();
    fixture.remote_schemas.set_schema(
        "http://authors.example/graphql",
        schemacache::backend::RemoteIntrospection {
            query_root: ["author".to_string()].into(),
            mutation_root: Default::default(),
            types: Default::default(),
        },
    );
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        json!({
            "type": "add_remote_schema",
            "args": { "name": "authors", "definition": { "url": "http://authors.example/graphql" } }
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err
        .message
        .contains("conflicting definitions for field \"author\" of type \"query_root\""));
    assert!(engine.cache().root_fields.query.contains_key("author"));
}

#[tokio::test]
async fn test_remote_schema_permissions() {
    let fixture = with_remote_permissions();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, add_countries()).await.unwrap();

    let grant = |role: &str, schema: &str| {
        json!({
            "type": "add_remote_schema_permissions",
            "args": { "remote_schema": "countries", "role": role, "definition": { "schema": schema } }
        })
    };

    run(
        &engine,
        grant("user", "type Query { country(code: ID!): Country } type Country { code: ID }"),
    )
    .await
    .unwrap();
    let cache = engine.cache();
    let countries = &cache.remote_schemas[&RemoteSchemaName::new("countries")];
    let user = &countries.permissions[&RoleName::new("user")];
    assert!(user.query_root.contains("country"));

    let err = run(&engine, grant("user", "type Query { countries: [Country] }"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    let err = run(&engine, grant("guest", "type Query { cities: [String] }"))
        .await
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err.message.contains(
        "the following fields of \"query_root\" do not exist in the remote schema: cities"
    ));

    // Its own permissions do not keep a remote schema alive
    run(
        &engine,
        json!({ "type": "remove_remote_schema", "args": { "name": "countries" } }),
    )
    .await
    .unwrap();
    assert!(engine.metadata().remote_schemas.is_empty());
    assert!(engine.cache().is_consistent());
}

#[tokio::test]
async fn test_drop_remote_schema_permissions() {
    let fixture = with_remote_permissions();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, add_countries()).await.unwrap();
    run(
        &engine,
        json!({
            "type": "add_remote_schema_permissions",
            "args": {
                "remote_schema": "countries",
                "role": "user",
                "definition": { "schema": "type Query { countries: [Country] }" }
            }
        }),
    )
    .await
    .unwrap();

    let drop = json!({
        "type": "drop_remote_schema_permissions",
        "args": { "remote_schema": "countries", "role": "user" }
    });
    run(&engine, drop.clone()).await.unwrap();
    assert!(engine.cache().remote_schemas[&RemoteSchemaName::new("countries")]
        .permissions
        .is_empty());

    let err = run(&engine, drop).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_remote_schema_permissions_need_the_feature() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, add_countries()).await.unwrap();

    let err = run(
        &engine,
        json!({
            "type": "add_remote_schema_permissions",
            "args": {
                "remote_schema": "countries",
                "role": "user",
                "definition": { "schema": "type Query { countries: [Country] }" }
            }
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    assert_eq!(err.class, ErrorClass::User);
    assert!(engine.metadata().remote_schemas[0].permissions.is_empty());
}

#[tokio::test]
async fn test_add_source() {
    let fixture = Fixture::new();
    fixture.backend.set_database("analytics", blog_database());
    let engine = fixture.engine(blog_metadata()).await;

    let add = |url: &str, replace: bool| {
        json!({
            "type": "add_source",
            "args": {
                "name": "analytics",
                "kind": "postgres",
                "configuration": { "connection_info": { "database_url": url } },
                "replace_configuration": replace
            }
        })
    };

    run(&engine, add("postgres://localhost:5432/analytics", false))
        .await
        .unwrap();
    let analytics = SourceName::new("analytics");
    assert!(engine.cache().source(&analytics).is_some());

    let err = run(&engine, add("postgres://replica:5432/analytics", false))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    run(&engine, add("postgres://replica:5432/analytics", true))
        .await
        .unwrap();
    let metadata = engine.metadata();
    assert_eq!(
        metadata.source(&analytics).unwrap().configuration["connection_info"]["database_url"],
        "postgres://replica:5432/analytics"
    );
    assert_eq!(metadata.sources.len(), 2);
}

#[tokio::test]
async fn test_add_data_connector() {
    let agent: AgentInfo = serde_json::from_value(json!({ "name": "sqlite" })).unwrap();
    let fixture = Fixture {
        agents: Arc::new(StaticAgentProvider::new().with_agent(AGENT_URI, agent)),
        ..Fixture::new()
    };
    let engine = fixture.engine(blog_metadata()).await;

    let add = |name: &str, uri: &str| {
        json!({
            "type": "add_data_connector",
            "args": { "name": name, "uri": uri, "display_name": "SQLite" }
        })
    };

    run(&engine, add("sqlite", AGENT_URI)).await.unwrap();
    let cache = engine.cache();
    let agent = &cache.data_connectors[&DataConnectorName::new("sqlite")];
    assert_eq!(agent.display_name.as_deref(), Some("SQLite"));

    let err = run(&engine, add("sqlite", AGENT_URI)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    let err = run(&engine, add("duckdb", "http://agents.example/duckdb"))
        .await
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err.message.contains("is not reachable at http://agents.example/duckdb"));
    assert_eq!(engine.metadata().backend_configs.dataconnector.len(), 1);
}
