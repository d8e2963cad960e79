//! Periodic background jobs.
//!
//! Each function is a long-running loop intended to be spawned via
//! `tokio::spawn`, and returns once `cancel` is triggered.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::followups::broadcast_unreviewed_count;
use crate::index::{rebuild, RebuildOutcome};

/// Rebuild the graph index on a fixed interval.
///
/// The first tick is skipped: the engine builds an index while starting.
pub async fn run_index_rebuild(ctx: Arc<EngineContext>, cancel: CancellationToken) {
    let period = ctx.config.index_rebuild_interval;
    tracing::info!(interval_secs = period.as_secs(), "Graph index rebuild job started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Graph index rebuild job stopping");
                break;
            }
            _ = interval.tick() => {
                match rebuild(&ctx).await {
                    Ok(RebuildOutcome::Published(_)) => {}
                    Ok(RebuildOutcome::Superseded { generation }) => {
                        tracing::debug!(generation, "Periodic graph index build superseded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Periodic graph index rebuild failed");
                    }
                }
            }
        }
    }
}

/// Broadcast the unreviewed-article count on a fixed interval.
pub async fn run_unreviewed_count(ctx: Arc<EngineContext>, cancel: CancellationToken) {
    let period = ctx.config.unreviewed_count_interval;
    tracing::info!(interval_secs = period.as_secs(), "Unreviewed count job started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Unreviewed count job stopping");
                break;
            }
            _ = interval.tick() => {
                broadcast_unreviewed_count(&ctx).await;
            }
        }
    }
}
