use std::sync::Arc;

use futures::TryStreamExt;
use wikigraph_core::article::Article;
use wikigraph_core::directory::{DirectoryObject, DIRECTORY_COLLECTION};
use wikigraph_db::{DocumentStore, StoreError};
use wikigraph_events::EventPayload;

use super::{GraphIndex, GraphIndexParts};
use crate::collections::READ_ALIAS;
use crate::context::EngineContext;

/// Result of one rebuild.
#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    Published(Arc<GraphIndex>),
    /// A newer build was published first; this one was dropped.
    Superseded { generation: u64 },
}

/// Rebuild the graph index from full scans of the article and directory
/// collections and publish it.
///
/// Rebuilds do not go through the write serializer and may overlap.
pub async fn rebuild(ctx: &EngineContext) -> Result<RebuildOutcome, StoreError> {
    let generation = ctx.graph.begin_build();
    let schema = ctx.schema.snapshot();
    let page_size = ctx.config.scan_page_size;
    let mut parts = GraphIndexParts::new(&schema);

    let mut skipped = 0usize;
    let mut pages = ctx.store().scan(READ_ALIAS, None, page_size);
    while let Some(page) = pages.try_next().await? {
        for doc in page {
            match doc.parse::<Article>() {
                Ok(article) => parts.add_article(&article),
                Err(e) => {
                    skipped += 1;
                    tracing::debug!(id = %doc.id, error = %e, "Article not indexable");
                }
            }
        }
    }
    drop(pages);

    let objects = load_directory(ctx.store(), page_size).await?;
    parts.set_directory(&objects);

    let index = Arc::new(parts.finish(generation));
    if ctx.graph.publish(Arc::clone(&index)) {
        tracing::info!(
            generation,
            articles = index.article_count(),
            directory_objects = index.directory().len(),
            skipped,
            "Graph index published"
        );
        ctx.bus.publish(EventPayload::GraphIndexPublished {
            generation,
            articles: index.article_count(),
        });
        Ok(RebuildOutcome::Published(index))
    } else {
        tracing::debug!(generation, "Discarding superseded graph index build");
        Ok(RebuildOutcome::Superseded { generation })
    }
}

async fn load_directory(
    store: &dyn DocumentStore,
    page_size: usize,
) -> Result<Vec<DirectoryObject>, StoreError> {
    if !store.index_exists(DIRECTORY_COLLECTION).await? {
        return Ok(Vec::new());
    }
    let mut objects = Vec::new();
    let mut pages = store.scan(DIRECTORY_COLLECTION, None, page_size);
    while let Some(page) = pages.try_next().await? {
        for doc in page {
            match doc.parse::<DirectoryObject>() {
                Ok(object) => objects.push(object),
                Err(e) => tracing::debug!(id = %doc.id, error = %e, "Directory object not indexable"),
            }
        }
    }
    Ok(objects)
}
