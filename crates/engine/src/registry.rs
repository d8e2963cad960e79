//! The current schema snapshot holder and the declaration scan feeding it.

use std::sync::{Arc, RwLock};

use futures::TryStreamExt;
use wikigraph_core::schema::{SchemaScan, SchemaSnapshot};
use wikigraph_db::{DocumentStore, StoreError};

use crate::upgrade::upgrade;

/// Owner of the adopted [`SchemaSnapshot`]. Readers get an `Arc` to an
/// immutable snapshot; adoption swaps the reference.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    current: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaRegistry {
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn adopt(&self, snapshot: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }
        snapshot
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }
}

/// Full scan of `index` for tag-type declarations.
///
/// Only the reviewed state declares types. Documents still in an older
/// layout are upgraded in memory first so their declarations count.
pub async fn scan_declarations(
    store: &dyn DocumentStore,
    index: &str,
    page_size: usize,
) -> Result<SchemaScan, StoreError> {
    let mut scan = SchemaScan::new();
    let mut pages = store.scan(index, None, page_size);
    while let Some(page) = pages.try_next().await? {
        for doc in page {
            match upgrade(&doc.id, &doc.body) {
                Ok(upgraded) => {
                    if let Some(reviewed) = &upgraded.article.reviewed {
                        scan.add_article(&doc.id, &reviewed.tags);
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %doc.id, error = %e, "Skipping unreadable document in schema scan");
                }
            }
        }
    }
    if !scan.skipped().is_empty() {
        tracing::warn!(skipped = ?scan.skipped(), "Ignored tag-type declarations with unknown types");
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wikigraph_core::schema::SchemaTransition;
    use wikigraph_core::tag_type::TagType;
    use wikigraph_db::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn declarations_come_from_reviewed_state_only() {
        let store = MemoryStore::new();
        store.create_index("a").await.unwrap();
        store
            .put(
                "a",
                "ip",
                json!({ "title": "ip", "body": "", "tags": ["tag-type:ip"] }),
            )
            .await
            .unwrap();
        store
            .put(
                "a",
                "port",
                json!({
                    "id": "port",
                    "uuid": "0190b5c4-8f1e-7c3a-9d2b-3a4f5e6d7c8b",
                    "reviewed": null,
                    "unreviewed": { "title": "port", "body": "", "tags": ["tag-type:integer"],
                                    "updatedBy": "bob", "updatedTime": "2024-01-01T00:00:00Z" },
                    "unreviewedPending": true
                }),
            )
            .await
            .unwrap();

        let scan = scan_declarations(&store, "a", 1).await.unwrap();
        let snapshot = SchemaSnapshot::bootstrap();
        let SchemaTransition::Changed { snapshot: next, diff } = snapshot.reduce(&scan) else {
            panic!("expected a schema change");
        };
        assert_eq!(next.tag_type("ip"), Some(TagType::Ip));
        assert_eq!(next.tag_type("port"), None);
        assert_eq!(diff.added, vec!["ip".to_string()]);

        let again = scan_declarations(&store, "a", 10).await.unwrap();
        assert_eq!(next.reduce(&again), SchemaTransition::Unchanged);
    }

    #[test]
    fn adopt_swaps_the_snapshot() {
        let registry = SchemaRegistry::default();
        let held = registry.snapshot();
        assert_eq!(held.generation(), 0);

        let mut scan = SchemaScan::new();
        scan.add_article("port", &["tag-type:integer"]);
        let SchemaTransition::Changed { snapshot, .. } = held.reduce(&scan) else {
            panic!("expected a schema change");
        };
        registry.adopt(snapshot);

        assert_eq!(registry.generation(), 1);
        assert_eq!(held.generation(), 0);
    }
}
