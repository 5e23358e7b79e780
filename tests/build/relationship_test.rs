// Integration tests for relationship resolution and dependency tracking

#[path = "../common/mod.rs"]
mod common;

use common::*;
use schemacache::backend::RemoteIntrospection;
use schemacache::metadata::names::*;
use schemacache::metadata::{PermType, RelType};
use schemacache::schema::{DependencyReason, MetadataObjId, SchemaDependency, SchemaObjId};
use serde_json::json;

fn default() -> SourceName {
    SourceName::new("default")
}

fn author_rel() -> MetadataObjId {
    MetadataObjId::relationship(
        &default(),
        &TableName::new("article"),
        &RelName::new("author_by_author_id"),
        RelType::Object,
    )
}

/// The blog database with a second constraint on `article.author_id`.
fn ambiguous_database() -> schemacache::backend::DatabaseMetadata {
    let mut db = blog_database();
    let article = db
        .tables
        .iter_mut()
        .find(|t| t.name == TableName::new("article"))
        .unwrap();
    let mut second = article.foreign_keys[0].clone();
    second.constraint = ConstraintName::new("article_author_id_fkey1");
    article.foreign_keys.push(second);
    db
}

#[tokio::test]
async fn test_object_relationship_dependencies() {
    let fixture = Fixture::new();
    let cache = fixture.build(&blog_metadata()).await.cache;
    assert!(cache.is_consistent());

    let article = TableName::new("article");
    let rel = cache
        .table(&default(), &article)
        .unwrap()
        .relationships
        .get(&RelName::new("author_by_author_id"))
        .unwrap();
    assert_eq!(rel.rel_type, RelType::Object);
    assert_eq!(rel.remote_table, TableName::new("author"));
    assert_eq!(rel.constraint, Some(ConstraintName::new("article_author_id_fkey")));
    assert_eq!(
        rel.column_mapping.get(&ColumnName::new("author_id")),
        Some(&ColumnName::new("id"))
    );

    let rel_id = SchemaObjId::relationship(&default(), &article, &RelName::new("author_by_author_id"));
    let deps = cache.dependencies.dependencies_of(&rel_id);

    assert!(deps.contains(&SchemaDependency::new(
        SchemaObjId::foreign_key(&default(), &article, &ConstraintName::new("article_author_id_fkey")),
        DependencyReason::Fkey,
    )));
    assert!(deps.contains(&SchemaDependency::new(
        SchemaObjId::table(&default(), &TableName::new("author")),
        DependencyReason::RemoteTable,
    )));
    assert!(deps.contains(&SchemaDependency::new(
        SchemaObjId::column(&default(), &article, &ColumnName::new("author_id")),
        DependencyReason::UsingColumn,
    )));
}

#[tokio::test]
async fn test_array_relationship_inverts_the_constraint() {
    let fixture = Fixture::new();
    let cache = fixture.build(&blog_metadata()).await.cache;

    let author = TableName::new("author");
    let rel = cache
        .table(&default(), &author)
        .unwrap()
        .relationships
        .get(&RelName::new("articles"))
        .unwrap();
    assert_eq!(rel.rel_type, RelType::Array);
    assert_eq!(rel.remote_table, TableName::new("article"));
    assert_eq!(
        rel.column_mapping.get(&ColumnName::new("id")),
        Some(&ColumnName::new("author_id"))
    );

    let rel_id = SchemaObjId::relationship(&default(), &author, &RelName::new("articles"));
    let reasons: Vec<String> = cache
        .dependencies
        .dependencies_of(&rel_id)
        .iter()
        .map(|d| d.reason.to_string())
        .collect();
    assert!(reasons.contains(&"remote_table".to_string()));
    assert!(reasons.contains(&"remote_fkey".to_string()));
}

#[tokio::test]
async fn test_ambiguous_foreign_key() {
    let fixture = Fixture::new();
    fixture.backend.set_database("default", ambiguous_database());

    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            {
                "table": "article",
                "object_relationships": [
                    { "name": "author_by_author_id", "using": { "foreign_key_constraint_on": "author_id" } }
                ]
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    let entry = &cache.inconsistent_objects[0];
    assert!(entry.involves(&author_rel()));
    assert_eq!(
        entry.reason(),
        "more than one foreign key constraint exists on the given column(s)"
    );

    // Both tables stay resolved
    assert!(cache.table(&default(), &TableName::new("author")).is_some());
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article.relationships.is_empty());
}

#[tokio::test]
async fn test_missing_foreign_key() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            {
                "table": "article",
                "object_relationships": [
                    { "name": "by_title", "using": { "foreign_key_constraint_on": "title" } }
                ]
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert_eq!(
        cache.inconsistent_objects[0].reason(),
        "no foreign key constraint exists on the given column(s)"
    );
    assert!(cache.table(&default(), &TableName::new("author")).is_some());
    assert!(cache.table(&default(), &TableName::new("article")).is_some());
}

#[tokio::test]
async fn test_relationship_to_untracked_table() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            {
                "table": "article",
                "object_relationships": [
                    { "name": "author_by_author_id", "using": { "foreign_key_constraint_on": "author_id" } }
                ]
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert!(cache.inconsistent_objects[0].involves(&author_rel()));
    assert_eq!(
        cache.inconsistent_objects[0].reason(),
        "no such table exists: \"author\""
    );
}

#[tokio::test]
async fn test_manual_relationship() {
    let fixture = Fixture::new();
    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            {
                "table": "article",
                "object_relationships": [
                    {
                        "name": "writer",
                        "using": {
                            "manual_configuration": {
                                "remote_table": "author",
                                "column_mapping": { "author_id": "id" }
                            }
                        }
                    },
                    {
                        "name": "broken",
                        "using": {
                            "manual_configuration": {
                                "remote_table": "author",
                                "column_mapping": { "author_id": "email" }
                            }
                        }
                    }
                ]
            }
        ]))]
    }));

    let cache = fixture.build(&metadata).await.cache;

    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    let writer = article.relationships.get(&RelName::new("writer")).unwrap();
    assert_eq!(writer.constraint, None);

    assert_eq!(cache.inconsistent_objects.len(), 1);
    assert_eq!(
        cache.inconsistent_objects[0].reason(),
        "no such column exists: \"email\" on table \"author\""
    );
}

#[tokio::test]
async fn test_evicted_table_prunes_dependents() {
    let fixture = Fixture::new();
    let authors_url = "http://authors.example/graphql";
    fixture.remote_schemas.set_schema(
        authors_url,
        RemoteIntrospection {
            query_root: ["author".to_string()].into(),
            ..Default::default()
        },
    );

    let metadata = metadata(json!({
        "version": 3,
        "sources": [default_source(json!([
            { "table": "author" },
            {
                "table": "article",
                "object_relationships": [
                    { "name": "author_by_author_id", "using": { "foreign_key_constraint_on": "author_id" } }
                ],
                "select_permissions": [
                    {
                        "role": "user",
                        "permission": {
                            "columns": "*",
                            "filter": { "author_by_author_id": { "id": { "_eq": 1 } } }
                        }
                    }
                ]
            }
        ]))],
        "remote_schemas": [
            { "name": "authors", "definition": { "url": authors_url } }
        ]
    }));

    let cache = fixture.build(&metadata).await.cache;

    // The root field conflict takes out the author table and the remote schema
    assert!(cache.table(&default(), &TableName::new("author")).is_none());
    assert!(cache.remote_schemas.is_empty());

    // ...which strands the relationship, which strands the permission
    let rel_entry = cache
        .inconsistent_objects
        .iter()
        .find(|e| e.involves(&author_rel()))
        .expect("relationship should be pruned");
    assert_eq!(
        rel_entry.reason(),
        "no such table author in source default exists"
    );

    let perm = MetadataObjId::permission(
        &default(),
        &TableName::new("article"),
        &RoleName::new("user"),
        PermType::Select,
    );
    assert!(cache.inconsistent_objects.iter().any(|e| e.involves(&perm)));

    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article.relationships.is_empty());
    assert!(article.permissions.is_empty());

    // Every surviving edge points at something in the cache
    for (dependent, dependency) in cache.dependencies.edges() {
        assert!(cache.contains(&dependent), "dangling dependent {}", dependent.describe());
        assert!(
            cache.contains(&dependency.target),
            "dangling dependency {}",
            dependency.target.describe()
        );
    }
}
