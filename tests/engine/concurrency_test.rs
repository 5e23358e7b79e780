// Concurrent writers and readers against one engine

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use schemacache::cache::SchemaCacheVer;
use schemacache::engine::ErrorCode;
use schemacache::metadata::names::*;
use schemacache::metadata::PermType;
use schemacache::store::{MetadataStore, StoreResult};
use schemacache::{run_command, InMemoryMetadataStore, Metadata, MetadataCommand, MetadataEngine};
use serde_json::{json, Value};
use tokio::sync::Notify;

const WRITERS: usize = 8;

fn default() -> SourceName {
    SourceName::new("default")
}

async fn run(engine: &MetadataEngine, command: Value) -> schemacache::MetadataResult<Value> {
    let command: MetadataCommand = serde_json::from_value(command).unwrap();
    run_command(engine, command).await
}

async fn grant_select(engine: &MetadataEngine, role: &str) -> schemacache::MetadataResult<Value> {
    run(
        engine,
        json!({
            "type": "create_select_permission",
            "args": { "table": "article", "role": role, "permission": { "columns": "*" } }
        }),
    )
    .await
}

/// Holds the first `store` call, and with it the writer lock, until released.
struct GatedStore {
    inner: InMemoryMetadataStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(metadata: Metadata) -> Self {
        Self {
            inner: InMemoryMetadataStore::with_metadata(metadata),
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl MetadataStore for GatedStore {
    async fn fetch(&self) -> StoreResult<(Metadata, u64)> {
        self.inner.fetch().await
    }

    async fn store(&self, metadata: &Metadata, expected_version: u64) -> StoreResult<u64> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.store(metadata, expected_version).await
    }
}

/// Start a permission that filters through `author_by_author_id`, hold it
/// mid-update, start dropping the relationship, then let the permission land.
async fn drop_relationship_during_create(cascade: bool) -> (schemacache::MetadataResult<Value>, Arc<MetadataEngine>) {
    let fixture = Fixture::new();
    let store = Arc::new(GatedStore::new(blog_metadata()));
    let engine = Arc::new(fixture.engine_with_store(store.clone()).await);

    let create = {
        let engine = engine.clone();
        tokio::spawn(async move {
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
        })
    };
    store.entered.notified().await;

    let drop = {
        let engine = engine.clone();
        tokio::spawn(async move {
            run(
                &engine,
                json!({
                    "type": "drop_relationship",
                    "args": { "table": "article", "relationship": "author_by_author_id", "cascade": cascade }
                }),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.release.notify_one();

    create.await.unwrap().unwrap();
    (drop.await.unwrap(), engine)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_are_serialized() {
    let fixture = Fixture::new();
    let store = Arc::new(InMemoryMetadataStore::with_metadata(blog_metadata()));
    let engine = Arc::new(fixture.engine_with_store(store.clone()).await);

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            grant_select(&engine, &format!("role_{}", i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every writer built on the previous one's result
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(WRITERS as u64));
    assert_eq!(store.resource_version().await.unwrap(), WRITERS as u64);

    let cache = engine.cache();
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    for i in 0..WRITERS {
        assert!(article.permission(&RoleName::new(format!("role_{}", i)), PermType::Select));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_a_partial_update() {
    let fixture = Fixture::new();
    let engine = Arc::new(fixture.engine(blog_metadata()).await);
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let engine = engine.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut last = SchemaCacheVer(0);
            let mut observed = 0usize;
            while !done.load(Ordering::SeqCst) {
                let snapshot = engine.snapshot();
                assert!(snapshot.version >= last, "versions went backwards");
                last = snapshot.version;

                // The document and the cache of one snapshot always agree
                let roles = snapshot
                    .metadata
                    .source(&default())
                    .unwrap()
                    .table(&TableName::new("article"))
                    .unwrap()
                    .select_permissions
                    .len();
                let resolved = snapshot
                    .cache
                    .table(&default(), &TableName::new("article"))
                    .unwrap()
                    .permissions
                    .len();
                assert_eq!(roles, resolved);
                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    for i in 0..WRITERS {
        grant_select(&engine, &format!("role_{}", i)).await.unwrap();
    }
    done.store(true, Ordering::SeqCst);

    let observed = reader.await.unwrap();
    assert!(observed > 0);
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(WRITERS as u64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_writers_do_not_disturb_others() {
    let fixture = Fixture::new();
    let engine = Arc::new(fixture.engine(blog_metadata()).await);

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let engine = engine.clone();
        // Every other request is rejected
        let role = if i % 2 == 0 {
            format!("role_{}", i)
        } else {
            "admin".to_string()
        };
        handles.push(tokio::spawn(async move { grant_select(&engine, &role).await }));
    }

    let mut succeeded = 0u64;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, (WRITERS / 2) as u64);
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(succeeded));
    assert!(engine.cache().is_consistent());
    assert_eq!(engine.snapshot().resource_version(), succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drop_sees_dependents_created_while_it_waits() {
    let (result, engine) = drop_relationship_during_create(false).await;

    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyError);
    assert!(err
        .message
        .contains("select permission user in table article in source default"));

    let cache = engine.cache();
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert_eq!(article.relationships.len(), 1);
    assert!(article.permission(&RoleName::new("user"), PermType::Select));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascading_drop_removes_dependents_created_while_it_waits() {
    let (result, engine) = drop_relationship_during_create(true).await;

    result.unwrap();
    let cache = engine.cache();
    assert!(cache.is_consistent());
    let article = cache.table(&default(), &TableName::new("article")).unwrap();
    assert!(article.relationships.is_empty());
    assert!(!article.permission(&RoleName::new("user"), PermType::Select));
    assert_eq!(engine.cache_ref().version(), SchemaCacheVer(2));
}
