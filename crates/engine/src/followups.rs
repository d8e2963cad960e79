//! Out-of-band work triggered by article writes.
//!
//! The lifecycle manager queues a [`FollowUp`] after every successful write
//! and returns immediately. The runner drains whatever has queued up, then
//! performs the follow-ups once for the whole burst: a schema reload (with
//! migration if the declarations changed), an unreviewed-count broadcast
//! and a graph index rebuild.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wikigraph_events::EventPayload;

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::index::rebuild;
use crate::lifecycle::unreviewed_count;
use crate::migrator::{reload_schema, ReloadOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    ArticleWritten { id: String },
}

pub struct FollowUpRunner {
    ctx: Arc<EngineContext>,
}

impl FollowUpRunner {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Run until `cancel` fires or every sender is dropped.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<FollowUp>, cancel: CancellationToken) {
        tracing::info!("Follow-up runner started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Follow-up runner stopping");
                    break;
                }
                message = receiver.recv() => {
                    let Some(first) = message else {
                        tracing::info!("Follow-up channel closed, runner exiting");
                        break;
                    };
                    let mut batch = vec![first];
                    while let Ok(next) = receiver.try_recv() {
                        batch.push(next);
                    }
                    self.process(&batch).await;
                }
            }
        }
    }

    async fn process(&self, batch: &[FollowUp]) {
        tracing::debug!(writes = batch.len(), "Running write follow-ups");

        let ctx = Arc::clone(&self.ctx);
        let reload = self
            .ctx
            .serializer
            .submit(async move { reload_schema(&ctx, false).await })
            .await
            .and_then(|outcome| outcome);
        match reload {
            Ok(ReloadOutcome::Unchanged { .. }) => {}
            Ok(ReloadOutcome::Migrated { report, .. }) => {
                tracing::info!(
                    generation = report.generation,
                    documents = report.documents,
                    "Schema change after write applied"
                );
            }
            Err(EngineError::Migration(e)) if e.is_fatal() => {
                tracing::error!(error = %e, "Schema migration left the article aliases split");
            }
            Err(e) => tracing::error!(error = %e, "Schema reload after write failed"),
        }

        broadcast_unreviewed_count(&self.ctx).await;

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            if let Err(e) = rebuild(&ctx).await {
                tracing::error!(error = %e, "Graph index rebuild after write failed");
            }
        });
    }
}

/// Count articles with pending changes and publish the number.
pub async fn broadcast_unreviewed_count(ctx: &EngineContext) {
    match unreviewed_count(ctx).await {
        Ok(count) => {
            tracing::debug!(count, "Unreviewed count refreshed");
            ctx.bus.publish(EventPayload::UnreviewedCount { count });
        }
        Err(e) => tracing::error!(error = %e, "Unreviewed count refresh failed"),
    }
}
