//! Online schema migration.
//!
//! A schema change rebuilds the whole article collection: every document is
//! streamed out of the current collection, upgraded, re-extracted under the
//! new schema and bulk-written into a fresh physical collection. Only once
//! that collection is complete and refreshed are both article aliases
//! repointed, in a single atomic alias update.
//!
//! Must only run inside the write serializer.

use futures::TryStreamExt;
use wikigraph_core::article::HistoryEntry;
use wikigraph_core::extract::extract;
use wikigraph_core::schema::{SchemaDiff, SchemaSnapshot, SchemaTransition};
use wikigraph_db::{AliasAction, DocumentStore, StoreError, StoredDocument};
use wikigraph_events::{EventBus, EventPayload};

use crate::collections::{
    article_index_name, legacy_documents, HISTORY_COLLECTION, READ_ALIAS, WRITE_ALIAS,
};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{EngineError, MigrationError};
use crate::registry::scan_declarations;
use crate::upgrade::upgrade;

/// What a completed migration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub generation: u64,
    pub from_index: String,
    pub to_index: String,
    pub documents: u64,
    /// Embedded history items moved into the history collection.
    pub history_entries: u64,
    /// Documents copied without re-extraction.
    pub copied_raw: u64,
    pub previous_deleted: bool,
}

#[derive(Debug, Default)]
struct CopyStats {
    documents: u64,
    history_entries: u64,
    copied_raw: u64,
}

/// Outcome of a schema reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged { generation: u64 },
    Migrated { diff: SchemaDiff, report: MigrationReport },
}

// ---------------------------------------------------------------------------
// Reload
// ---------------------------------------------------------------------------

/// Rescan declarations and migrate when the schema changed.
///
/// With `force_migration` the collection is rebuilt even when the schema is
/// unchanged, which applies pending structural upgrades.
pub async fn reload_schema(
    ctx: &EngineContext,
    force_migration: bool,
) -> Result<ReloadOutcome, EngineError> {
    let current = ctx.schema.snapshot();
    let page_size = ctx.config.scan_page_size;
    let scan = scan_declarations(ctx.store(), READ_ALIAS, page_size).await?;

    let (target, diff) = match current.reduce(&scan) {
        SchemaTransition::Unchanged if !force_migration => {
            tracing::debug!(generation = current.generation(), "Tag schema unchanged");
            return Ok(ReloadOutcome::Unchanged {
                generation: current.generation(),
            });
        }
        SchemaTransition::Unchanged => (current.as_ref().clone(), SchemaDiff::default()),
        SchemaTransition::Changed { snapshot, diff } => (snapshot, diff),
    };

    tracing::info!(
        generation = target.generation(),
        added = ?diff.added,
        removed = ?diff.removed,
        changed = ?diff.changed,
        "Migrating article collection"
    );
    let report = Migrator::new(ctx.store(), &ctx.bus, &ctx.config)
        .migrate(&target)
        .await?;

    let rescan = scan_declarations(ctx.store(), READ_ALIAS, page_size).await?;
    let adopted = SchemaSnapshot::from_scan(target.generation(), &rescan);
    if adopted != target {
        tracing::warn!(
            generation = target.generation(),
            "Schema read back from the new collection differs from the migration target"
        );
    }
    ctx.schema.adopt(adopted);

    Ok(ReloadOutcome::Migrated { diff, report })
}

/// Load the schema at start-up.
///
/// The discovered schema is adopted as is when every stored document is in
/// the current layout and its derived fields match what the schema derives.
/// Otherwise the collection is migrated.
pub async fn load_schema(ctx: &EngineContext) -> Result<ReloadOutcome, EngineError> {
    let legacy = ctx.store().count(READ_ALIAS, &legacy_documents()).await?;
    if legacy > 0 {
        tracing::info!(legacy, "Stored articles need a structural upgrade");
        return reload_schema(ctx, true).await;
    }

    let page_size = ctx.config.scan_page_size;
    let scan = scan_declarations(ctx.store(), READ_ALIAS, page_size).await?;
    let current = ctx.schema.snapshot();
    let discovered = match current.reduce(&scan) {
        SchemaTransition::Unchanged => current.as_ref().clone(),
        SchemaTransition::Changed { snapshot, .. } => snapshot,
    };

    if let Some(id) = first_stale_document(ctx.store(), &discovered, page_size).await? {
        tracing::info!(id = %id, "Stored derived fields disagree with the tag schema");
        return reload_schema(ctx, true).await;
    }

    let generation = discovered.generation();
    tracing::info!(generation, types = discovered.definitions().len(), "Tag schema loaded");
    ctx.schema.adopt(discovered);
    Ok(ReloadOutcome::Unchanged { generation })
}

/// Id of the first article whose layout or derived fields differ from what
/// `schema` produces.
async fn first_stale_document(
    store: &dyn DocumentStore,
    schema: &SchemaSnapshot,
    page_size: usize,
) -> Result<Option<String>, StoreError> {
    let mut pages = store.scan(READ_ALIAS, None, page_size);
    while let Some(page) = pages.try_next().await? {
        for doc in page {
            let Ok(upgraded) = upgrade(&doc.id, &doc.body) else {
                continue;
            };
            if upgraded.changed {
                return Ok(Some(doc.id));
            }
            let article = upgraded.article;
            for state in [article.reviewed.as_ref(), article.unreviewed.as_ref()]
                .into_iter()
                .flatten()
            {
                let Ok(extracted) = extract(&state.content(), schema) else {
                    continue;
                };
                let mut rederived = state.clone();
                rederived.rederive(extracted);
                if &rederived != state {
                    return Ok(Some(doc.id));
                }
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Migrator
// ---------------------------------------------------------------------------

pub struct Migrator<'a> {
    store: &'a dyn DocumentStore,
    bus: &'a EventBus,
    config: &'a EngineConfig,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a dyn DocumentStore, bus: &'a EventBus, config: &'a EngineConfig) -> Self {
        Self { store, bus, config }
    }

    /// Rebuild the article collection under `schema` and flip both aliases.
    pub async fn migrate(&self, schema: &SchemaSnapshot) -> Result<MigrationReport, MigrationError> {
        let generation = schema.generation();
        let from_index = self
            .store
            .resolve_alias(WRITE_ALIAS)
            .await
            .map_err(MigrationError::Stream)?
            .ok_or(MigrationError::MissingAlias(WRITE_ALIAS))?;
        let from_read = self
            .store
            .resolve_alias(READ_ALIAS)
            .await
            .map_err(MigrationError::Stream)?;
        let to_index = article_index_name(generation);
        if to_index == from_index || from_read.as_deref() == Some(to_index.as_str()) {
            return Err(MigrationError::TargetIsLive(to_index));
        }

        tracing::info!(generation, from = %from_index, to = %to_index, "Starting schema migration");

        // Nothing to clean up when the target could not be created.
        if let Err(e) = self.store.create_index(&to_index).await {
            return Err(self.aborted(generation, e));
        }

        let stats = match self.copy(&from_index, &to_index, schema).await {
            Ok(stats) => stats,
            Err(e) => {
                if let Err(cleanup) = self.store.delete_index(&to_index).await {
                    tracing::warn!(index = %to_index, error = %cleanup, "Failed to drop partial collection");
                }
                return Err(self.aborted(generation, e));
            }
        };

        let mut actions = Vec::with_capacity(4);
        if let Some(read) = &from_read {
            actions.push(AliasAction::remove(READ_ALIAS, read));
        }
        actions.push(AliasAction::add(READ_ALIAS, &to_index));
        actions.push(AliasAction::remove(WRITE_ALIAS, &from_index));
        actions.push(AliasAction::add(WRITE_ALIAS, &to_index));

        if let Err(e) = self.store.update_aliases(&actions).await {
            tracing::error!(
                generation,
                from = %from_index,
                to = %to_index,
                error = %e,
                "Alias flip failed, article reads and writes may be split"
            );
            self.bus.publish(EventPayload::AliasFlipFailed {
                from_index: from_index.clone(),
                to_index: to_index.clone(),
                error: e.to_string(),
            });
            return Err(MigrationError::AliasFlip(e));
        }

        let mut previous_deleted = false;
        if !self.config.retain_previous_collection {
            let mut previous = vec![from_index.as_str()];
            match from_read.as_deref() {
                Some(read) if read != from_index => previous.push(read),
                _ => {}
            }
            previous_deleted = true;
            for index in previous {
                if let Err(e) = self.store.delete_index(index).await {
                    previous_deleted = false;
                    tracing::warn!(index, error = %e, "Failed to delete previous article collection");
                }
            }
        }

        tracing::info!(
            generation,
            documents = stats.documents,
            history_entries = stats.history_entries,
            copied_raw = stats.copied_raw,
            to = %to_index,
            "Schema migration complete"
        );
        self.bus.publish(EventPayload::SchemaMigrated {
            generation,
            from_index: from_index.clone(),
            to_index: to_index.clone(),
            documents: stats.documents,
        });

        Ok(MigrationReport {
            generation,
            from_index,
            to_index,
            documents: stats.documents,
            history_entries: stats.history_entries,
            copied_raw: stats.copied_raw,
            previous_deleted,
        })
    }

    fn aborted(&self, generation: u64, error: StoreError) -> MigrationError {
        tracing::error!(generation, error = %error, "Schema migration aborted, previous collection stays authoritative");
        self.bus.publish(EventPayload::SchemaMigrationFailed {
            generation,
            error: error.to_string(),
        });
        MigrationError::Stream(error)
    }

    /// Stream `from` into the freshly created collection `to`. The next page
    /// is only requested after the previous one has been written.
    async fn copy(
        &self,
        from: &str,
        to: &str,
        schema: &SchemaSnapshot,
    ) -> Result<CopyStats, StoreError> {
        let mut stats = CopyStats::default();
        let mut pages = self.store.scan(from, None, self.config.scan_page_size);
        while let Some(page) = pages.try_next().await? {
            for batch in page.chunks(self.config.migration_batch_size.max(1)) {
                let mut docs = Vec::with_capacity(batch.len());
                let mut history = Vec::new();
                for doc in batch {
                    let (body, entries) = transform(doc, schema, &mut stats);
                    docs.push(StoredDocument::new(doc.id.clone(), doc.version, body));
                    history.extend(entries);
                }

                stats.documents += docs.len() as u64;
                self.store.bulk_index(to, docs).await?;

                if !history.is_empty() {
                    stats.history_entries += history.len() as u64;
                    let entries = history
                        .iter()
                        .map(|entry| {
                            Ok(StoredDocument::new(
                                entry.entry_id.to_string(),
                                1,
                                serde_json::to_value(entry)?,
                            ))
                        })
                        .collect::<Result<Vec<_>, serde_json::Error>>()?;
                    self.store.bulk_index(HISTORY_COLLECTION, entries).await?;
                }
            }
            tracing::debug!(to, documents = stats.documents, "Migrated page");
        }

        self.store.refresh(to).await?;
        Ok(stats)
    }
}

/// Upgrade and re-extract one document. Documents that cannot be upgraded
/// are copied verbatim; states that fail extraction keep their old derived
/// fields.
fn transform(
    doc: &StoredDocument,
    schema: &SchemaSnapshot,
    stats: &mut CopyStats,
) -> (serde_json::Value, Vec<HistoryEntry>) {
    let upgraded = match upgrade(&doc.id, &doc.body) {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::warn!(id = %doc.id, error = %e, "Copying document without re-extraction");
            stats.copied_raw += 1;
            return (doc.body.clone(), Vec::new());
        }
    };

    let mut article = upgraded.article;
    for state in [article.reviewed.as_mut(), article.unreviewed.as_mut()]
        .into_iter()
        .flatten()
    {
        match extract(&state.content(), schema) {
            Ok(extracted) => state.rederive(extracted),
            Err(e) => {
                tracing::warn!(id = %doc.id, error = %e, "Keeping previous derived fields");
            }
        }
    }

    match serde_json::to_value(&article) {
        Ok(body) => (body, upgraded.history),
        Err(e) => {
            tracing::warn!(id = %doc.id, error = %e, "Copying document without re-extraction");
            stats.copied_raw += 1;
            (doc.body.clone(), Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use wikigraph_core::schema::SchemaScan;
    use wikigraph_db::MemoryStore;

    use super::*;
    use crate::collections::bootstrap;

    fn ip_schema() -> SchemaSnapshot {
        let mut scan = SchemaScan::new();
        scan.add_article("ip", &["tag-type:ip"]);
        SchemaSnapshot::from_scan(1, &scan)
    }

    async fn seeded() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        bootstrap(&store).await.unwrap();
        let index = store.resolve_alias(WRITE_ALIAS).await.unwrap().unwrap();
        store
            .bulk_index(
                &index,
                vec![
                    StoredDocument::new(
                        "web-01",
                        4,
                        json!({ "title": "web-01", "body": "Front end.", "tags": ["server", "ip:10.0.0.1"] }),
                    ),
                    StoredDocument::new(
                        "ip",
                        1,
                        json!({ "title": "ip", "body": "", "tags": ["tag-type:ip"] }),
                    ),
                ],
            )
            .await
            .unwrap();
        (store, index)
    }

    #[tokio::test]
    async fn migration_rederives_and_flips_both_aliases() {
        let (store, old_index) = seeded().await;
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let config = EngineConfig::default();

        let report = Migrator::new(&store, &bus, &config)
            .migrate(&ip_schema())
            .await
            .unwrap();

        assert_eq!(report.documents, 2);
        assert!(report.previous_deleted);
        assert!(!store.index_exists(&old_index).await.unwrap());
        assert_eq!(
            store.resolve_alias(READ_ALIAS).await.unwrap(),
            Some(report.to_index.clone())
        );
        assert_eq!(
            store.resolve_alias(WRITE_ALIAS).await.unwrap(),
            Some(report.to_index.clone())
        );

        let doc = store.get(READ_ALIAS, "web-01").await.unwrap().unwrap();
        assert_eq!(doc.version, 4);
        assert_eq!(doc.body["reviewed"]["relationships"]["ip"], json!(["10.0.0.1"]));
        assert_eq!(doc.body["unreviewed"]["relationships"]["ip"], json!(["10.0.0.1"]));

        let event = events.recv().await.unwrap();
        assert_matches!(event.payload, EventPayload::SchemaMigrated { generation: 1, documents: 2, .. });
    }

    #[tokio::test]
    async fn retained_previous_collection_survives() {
        let (store, old_index) = seeded().await;
        let bus = EventBus::default();
        let config = EngineConfig {
            retain_previous_collection: true,
            ..EngineConfig::default()
        };

        let report = Migrator::new(&store, &bus, &config)
            .migrate(&ip_schema())
            .await
            .unwrap();
        assert!(!report.previous_deleted);
        assert!(store.index_exists(&old_index).await.unwrap());
    }

    #[tokio::test]
    async fn migration_right_after_bootstrap_targets_a_new_collection() {
        let store = MemoryStore::new();
        bootstrap(&store).await.unwrap();
        let live = store.resolve_alias(WRITE_ALIAS).await.unwrap().unwrap();
        let bus = EventBus::default();
        let config = EngineConfig::default();

        let report = Migrator::new(&store, &bus, &config)
            .migrate(&SchemaSnapshot::bootstrap())
            .await
            .unwrap();

        assert_eq!(report.from_index, live);
        assert_ne!(report.to_index, live);
        assert!(store.index_exists(&report.to_index).await.unwrap());
        assert_eq!(
            store.resolve_alias(READ_ALIAS).await.unwrap(),
            Some(report.to_index.clone())
        );
    }

    #[tokio::test]
    async fn missing_write_alias_is_reported() {
        let store = MemoryStore::new();
        let bus = EventBus::default();
        let config = EngineConfig::default();
        let result = Migrator::new(&store, &bus, &config)
            .migrate(&ip_schema())
            .await;
        assert_matches!(result, Err(MigrationError::MissingAlias(WRITE_ALIAS)));
    }
}
