//! Collection and alias names, and start-up bootstrap of the store layout.

use uuid::Uuid;
use wikigraph_core::directory::{DIRECTORY_COLLECTION, ENDPOINT_COLLECTION};
use wikigraph_db::{AliasAction, DocumentStore, Query};

use crate::error::MigrationError;

/// Alias every article read goes through.
pub const READ_ALIAS: &str = "articles-read";

/// Alias every article write goes through.
pub const WRITE_ALIAS: &str = "articles-write";

/// Append-only collection of committed reviewed versions.
pub const HISTORY_COLLECTION: &str = "history";

/// A fresh physical article collection name for a schema generation.
///
/// Names are unique per call, so two migrations of the same generation
/// never target the same collection.
pub fn article_index_name(generation: u64) -> String {
    format!("articles-g{generation}-{}", Uuid::now_v7().simple())
}

/// Make sure both article aliases and the side collections exist.
///
/// Returns `true` when a brand new article collection was created.
pub async fn bootstrap(store: &dyn DocumentStore) -> Result<bool, MigrationError> {
    let read = store
        .resolve_alias(READ_ALIAS)
        .await
        .map_err(MigrationError::Bootstrap)?;
    let write = store
        .resolve_alias(WRITE_ALIAS)
        .await
        .map_err(MigrationError::Bootstrap)?;

    let created = match (read, write) {
        (None, None) => {
            let index = article_index_name(0);
            store
                .create_index(&index)
                .await
                .map_err(MigrationError::Bootstrap)?;
            store
                .update_aliases(&[
                    AliasAction::add(READ_ALIAS, &index),
                    AliasAction::add(WRITE_ALIAS, &index),
                ])
                .await
                .map_err(MigrationError::Bootstrap)?;
            tracing::info!(index = %index, "Created initial article collection");
            true
        }
        (Some(index), None) => {
            tracing::warn!(index = %index, "Write alias missing, repointing it at the read collection");
            store
                .update_aliases(&[AliasAction::add(WRITE_ALIAS, &index)])
                .await
                .map_err(MigrationError::Bootstrap)?;
            false
        }
        (None, Some(index)) => {
            tracing::warn!(index = %index, "Read alias missing, repointing it at the write collection");
            store
                .update_aliases(&[AliasAction::add(READ_ALIAS, &index)])
                .await
                .map_err(MigrationError::Bootstrap)?;
            false
        }
        (Some(read), Some(write)) => {
            if read != write {
                tracing::warn!(read = %read, write = %write, "Article aliases point at different collections");
            }
            false
        }
    };

    for name in [HISTORY_COLLECTION, DIRECTORY_COLLECTION, ENDPOINT_COLLECTION] {
        if !store
            .index_exists(name)
            .await
            .map_err(MigrationError::Bootstrap)?
        {
            store
                .create_index(name)
                .await
                .map_err(MigrationError::Bootstrap)?;
            tracing::info!(collection = name, "Created collection");
        }
    }

    Ok(created)
}

/// Filter matching article documents that still need a structural upgrade.
pub fn legacy_documents() -> Query {
    Query::should(vec![
        Query::not(Query::exists("uuid")),
        Query::not(Query::exists("unreviewed")),
        Query::exists("history"),
    ])
}
