// Integration tests for table permissions and their boolean expressions

#[path = "../common/mod.rs"]
mod common;

use common::*;
use schemacache::engine::{ErrorClass, ErrorCode};
use schemacache::metadata::names::*;
use schemacache::metadata::PermType;
use schemacache::schema::{DependencyReason, SchemaDependency, SchemaObjId};
use schemacache::{run_command, MetadataCommand, MetadataEngine, MetadataResult};
use serde_json::{json, Value};

fn default() -> SourceName {
    SourceName::new("default")
}

async fn run(engine: &MetadataEngine, command: Value) -> MetadataResult<Value> {
    let command: MetadataCommand = serde_json::from_value(command).unwrap();
    run_command(engine, command).await
}

fn select_on_article(role: &str, permission: Value) -> Value {
    json!({
        "type": "create_select_permission",
        "args": { "table": "article", "role": role, "permission": permission }
    })
}

#[tokio::test]
async fn test_select_permission_through_relationship() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(
        &engine,
        select_on_article(
            "user",
            json!({
                "columns": ["id", "title"],
                "filter": { "author_by_author_id": { "name": { "_ilike": "%smith%" } } },
                "limit": 10
            }),
        ),
    )
    .await
    .unwrap();

    let cache = engine.cache();
    let article_name = TableName::new("article");
    let article = cache.table(&default(), &article_name).unwrap();
    assert!(article.permission(&RoleName::new("user"), PermType::Select));
    assert!(!article.permission(&RoleName::new("user"), PermType::Insert));

    let select = article.permissions[&RoleName::new("user")].select.as_ref().unwrap();
    assert_eq!(select.columns.len(), 2);
    assert_eq!(select.limit, Some(10));

    let perm_id = SchemaObjId::table_obj(
        &default(),
        &article_name,
        schemacache::schema::TableObjId::Permission {
            role: RoleName::new("user"),
            perm_type: PermType::Select,
        },
    );
    let deps = cache.dependencies.dependencies_of(&perm_id);
    assert!(deps.contains(&SchemaDependency::new(
        SchemaObjId::relationship(&default(), &article_name, &RelName::new("author_by_author_id")),
        DependencyReason::Untyped,
    )));
    assert!(deps.contains(&SchemaDependency::new(
        SchemaObjId::column(&default(), &TableName::new("author"), &ColumnName::new("name")),
        DependencyReason::Column,
    )));

    // The permission is persisted with the document
    let metadata = engine.metadata();
    let table = metadata.source(&default()).unwrap().table(&article_name).unwrap();
    assert!(table.has_permission(&RoleName::new("user"), PermType::Select));
}

#[tokio::test]
async fn test_unknown_column_is_a_targeted_error() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    let version = engine.cache_ref().version();

    let err = run(
        &engine,
        select_on_article("user", json!({ "columns": ["id", "email"] })),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    assert_eq!(err.class, ErrorClass::Targeted);
    assert_eq!(
        err.message,
        "Inconsistent object: no such column exists: \"email\" on table \"article\""
    );

    // Nothing was published
    assert_eq!(engine.cache_ref().version(), version);
    assert!(engine.cache().is_consistent());
    let metadata = engine.metadata();
    let table = metadata.source(&default()).unwrap().table(&TableName::new("article")).unwrap();
    assert!(table.select_permissions.is_empty());
}

#[tokio::test]
async fn test_unknown_operator() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(
        &engine,
        select_on_article("user", json!({ "columns": "*", "filter": { "id": { "_ilike": "1" } } })),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::Targeted);
    assert!(err.message.contains("unknown operator \"_ilike\" for type \"integer\""));
}

#[tokio::test]
async fn test_admin_role_cannot_be_given_permissions() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    let err = run(&engine, select_on_article("admin", json!({ "columns": "*" })))
        .await
        .unwrap_err();
    assert!(err
        .message
        .contains("the admin role has full access and cannot be given permissions"));
}

#[tokio::test]
async fn test_duplicate_permission_is_rejected() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(&engine, select_on_article("user", json!({ "columns": "*" })))
        .await
        .unwrap();
    let err = run(&engine, select_on_article("user", json!({ "columns": ["id"] })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
    assert_eq!(err.status(), 409);
}

#[tokio::test]
async fn test_mutation_permissions() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;

    run(
        &engine,
        json!({
            "type": "create_insert_permission",
            "args": {
                "table": "article",
                "role": "user",
                "permission": {
                    "columns": ["title"],
                    "check": { "author_id": { "_eq": 1 } },
                    "set": { "author_id": 1 }
                }
            }
        }),
    )
    .await
    .unwrap();
    run(
        &engine,
        json!({
            "type": "create_update_permission",
            "args": {
                "table": "article",
                "role": "user",
                "permission": {
                    "columns": ["title"],
                    "filter": { "_and": [{ "author_id": { "_eq": 1 } }, { "_not": { "id": { "_is_null": true } } }] }
                }
            }
        }),
    )
    .await
    .unwrap();
    run(
        &engine,
        json!({
            "type": "create_delete_permission",
            "args": {
                "table": "article",
                "role": "user",
                "permission": {
                    "filter": { "_exists": { "_table": "author", "_where": { "id": { "_eq": 1 } } } }
                }
            }
        }),
    )
    .await
    .unwrap();

    let cache = engine.cache();
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    let user = RoleName::new("user");
    assert!(article.permission(&user, PermType::Insert));
    assert!(article.permission(&user, PermType::Update));
    assert!(article.permission(&user, PermType::Delete));
    assert!(!article.permission(&user, PermType::Select));

    // Presets must name real columns
    let err = run(
        &engine,
        json!({
            "type": "create_insert_permission",
            "args": {
                "table": "author",
                "role": "user",
                "permission": { "columns": "*", "set": { "email": "x" } }
            }
        }),
    )
    .await
    .unwrap_err();
    assert!(err.message.contains("\"email\""));
}

#[tokio::test]
async fn test_drop_permission() {
    let fixture = Fixture::new();
    let engine = fixture.engine(blog_metadata()).await;
    run(&engine, select_on_article("user", json!({ "columns": "*" })))
        .await
        .unwrap();

    let drop = json!({
        "type": "drop_permission",
        "args": { "table": "article", "role": "user", "type": "select" }
    });
    run(&engine, drop.clone()).await.unwrap();
    let cache = engine.cache();
    assert!(!cache
        .table(&default(), &TableName::new("article"))
        .unwrap()
        .permission(&RoleName::new("user"), PermType::Select));

    let err = run(&engine, drop).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotExists);
}

#[tokio::test]
async fn test_permission_loaded_from_document() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            {
                "table": "article",
                "select_permissions": [
                    { "role": "user", "permission": { "columns": "*", "filter": { "rating": { "_gt": 3 } } } },
                    { "role": "guest", "permission": { "columns": ["id"] } }
                ]
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert!(cache.inconsistent_objects[0]
        .reason()
        .contains("\"rating\" is not a column, relationship or computed field of table \"article\""));

    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article.permission(&RoleName::new("guest"), PermType::Select));
    assert!(!article.permission(&RoleName::new("user"), PermType::Select));
}
