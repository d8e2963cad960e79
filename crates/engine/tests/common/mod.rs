#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use wikigraph_core::article::ReviewState;
use wikigraph_core::extract::ArticleContent;
use wikigraph_core::types::Version;
use wikigraph_db::{
    AliasAction, DocumentStore, MemoryStore, Query, SearchRequest, SearchResult, StoreError,
    StoredDocument, TermBucket,
};
use wikigraph_engine::collections::HISTORY_COLLECTION;
use wikigraph_engine::{Engine, EngineConfig, SaveOutcome};
use wikigraph_events::{EventBus, EventPayload, KbEvent};

/// Small pages so scans and migrations cross page boundaries.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        scan_page_size: 2,
        migration_batch_size: 1,
        ..EngineConfig::default()
    }
}

/// Start an engine over an empty in-memory store. The returned store
/// shares state with the engine's.
pub async fn start_engine() -> (Engine, MemoryStore, Arc<EventBus>) {
    start_engine_on(MemoryStore::new()).await
}

pub async fn start_engine_on(store: MemoryStore) -> (Engine, MemoryStore, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new(256));
    let engine = Engine::start(Arc::new(store.clone()), Arc::clone(&bus), test_config())
        .await
        .unwrap();
    (engine, store, bus)
}

/// Start an engine over a [`FaultyStore`] with no faults switched on yet.
pub async fn start_faulty_engine() -> (Engine, FaultyStore, Arc<EventBus>) {
    let store = FaultyStore::default();
    let bus = Arc::new(EventBus::new(256));
    let engine = Engine::start(Arc::new(store.clone()), Arc::clone(&bus), test_config())
        .await
        .unwrap();
    (engine, store, bus)
}

pub fn content(title: &str, body: &str, tags: &[&str]) -> ArticleContent {
    ArticleContent::new(title, body, tags.iter().copied())
}

pub async fn create(engine: &Engine, title: &str, body: &str, tags: &[&str]) -> SaveOutcome {
    engine
        .articles()
        .create(content(title, body, tags), "alice", ReviewState::Reviewed)
        .await
        .unwrap()
}

pub async fn create_unreviewed(engine: &Engine, title: &str, body: &str, tags: &[&str]) -> SaveOutcome {
    engine
        .articles()
        .create(content(title, body, tags), "bob", ReviewState::Unreviewed)
        .await
        .unwrap()
}

/// Declare `name` as a typed tag and make the engine pick it up.
pub async fn declare(engine: &Engine, name: &str, tags: &[&str]) {
    create(engine, name, "Tag declaration.", tags).await;
    engine.reload_schema(false).await.unwrap();
}

/// Everything published so far.
pub fn drain(receiver: &mut broadcast::Receiver<KbEvent>) -> Vec<EventPayload> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event.payload);
    }
    events
}

/// Wait for the first event matching `pred`.
pub async fn wait_for(
    receiver: &mut broadcast::Receiver<KbEvent>,
    pred: impl Fn(&EventPayload) -> bool,
) -> EventPayload {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match receiver.recv().await {
                Ok(event) if pred(&event.payload) => return event.payload,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Operations a [`FaultyStore`] can be told to fail.
#[derive(Debug, Default)]
pub struct Faults {
    /// `create_index` fails as if the index already existed.
    pub create_index: AtomicBool,
    /// `bulk_index` into anything but the history collection fails.
    pub article_bulk_index: AtomicBool,
    /// Writes into the history collection fail.
    pub history_writes: AtomicBool,
    pub update_aliases: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }
}

/// A [`MemoryStore`] that fails selected operations on demand.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub faults: Arc<Faults>,
}

fn injected(what: &str) -> StoreError {
    StoreError::Backend(format!("injected {what} failure"))
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn create_index(&self, index: &str) -> Result<(), StoreError> {
        if self.faults.create_index.load(Ordering::SeqCst) {
            return Err(StoreError::IndexExists(index.to_string()));
        }
        self.inner.create_index(index).await
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        self.inner.delete_index(index).await
    }

    async fn index_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.index_exists(name).await
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        self.inner.refresh(index).await
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), StoreError> {
        if self.faults.update_aliases.load(Ordering::SeqCst) {
            return Err(injected("alias update"));
        }
        self.inner.update_aliases(actions).await
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, StoreError> {
        self.inner.resolve_alias(alias).await
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.get(index, id).await
    }

    async fn create(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError> {
        self.inner.create(index, id, body).await
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        body: Value,
        expected: Version,
    ) -> Result<Version, StoreError> {
        self.inner.update(index, id, body, expected).await
    }

    async fn put(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError> {
        if index == HISTORY_COLLECTION && self.faults.history_writes.load(Ordering::SeqCst) {
            return Err(injected("history write"));
        }
        self.inner.put(index, id, body).await
    }

    async fn delete(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(index, id).await
    }

    async fn bulk_index(&self, index: &str, docs: Vec<StoredDocument>) -> Result<(), StoreError> {
        let faulted = if index == HISTORY_COLLECTION {
            &self.faults.history_writes
        } else {
            &self.faults.article_bulk_index
        };
        if faulted.load(Ordering::SeqCst) {
            return Err(injected("bulk index"));
        }
        self.inner.bulk_index(index, docs).await
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResult, StoreError> {
        self.inner.search(index, request).await
    }

    async fn count(&self, index: &str, query: &Query) -> Result<u64, StoreError> {
        self.inner.count(index, query).await
    }

    async fn terms_aggregation(
        &self,
        index: &str,
        query: &Query,
        field: &str,
        size: usize,
    ) -> Result<Vec<TermBucket>, StoreError> {
        self.inner.terms_aggregation(index, query, field, size).await
    }

    async fn scan_page(
        &self,
        index: &str,
        filter: Option<&Query>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.scan_page(index, filter, after, limit).await
    }
}
