//! Engine assembly: start-up, background jobs and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wikigraph_core::schema::SchemaSnapshot;
use wikigraph_db::DocumentStore;
use wikigraph_events::{EventBus, KbEvent};

use crate::background::{run_index_rebuild, run_unreviewed_count};
use crate::collections;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::correlation::CorrelationEngine;
use crate::error::EngineError;
use crate::followups::FollowUpRunner;
use crate::index::{rebuild, GraphIndex, GraphIndexHandle, RebuildOutcome};
use crate::lifecycle::ArticleManager;
use crate::migrator::{load_schema, reload_schema, ReloadOutcome};
use crate::registry::SchemaRegistry;
use crate::serializer::WriteSerializer;
use crate::sources::{default_sources, IdentitySource};

/// How long shutdown waits for each task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Engine {
    ctx: Arc<EngineContext>,
    articles: ArticleManager,
    correlation: CorrelationEngine,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    serializer_task: JoinHandle<()>,
}

impl Engine {
    /// Start the engine with the store-backed identity sources.
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let sources = default_sources(&store);
        Self::start_with_sources(store, bus, config, sources).await
    }

    /// Bootstrap the collections, load (and if needed migrate) the tag
    /// schema, build the first graph index and start the follow-up runner.
    pub async fn start_with_sources(
        store: Arc<dyn DocumentStore>,
        bus: Arc<EventBus>,
        config: EngineConfig,
        sources: Vec<Arc<dyn IdentitySource>>,
    ) -> Result<Self, EngineError> {
        let (serializer, serializer_task) = WriteSerializer::start();
        let ctx = Arc::new(EngineContext {
            store,
            bus,
            config,
            schema: SchemaRegistry::default(),
            graph: GraphIndexHandle::new(),
            serializer,
        });

        if collections::bootstrap(ctx.store()).await? {
            tracing::info!("Initialized empty knowledge base");
        }

        let loader = Arc::clone(&ctx);
        match ctx
            .serializer
            .submit(async move { load_schema(&loader).await })
            .await??
        {
            ReloadOutcome::Unchanged { generation } => {
                tracing::debug!(generation, "Start-up schema load needed no migration");
            }
            ReloadOutcome::Migrated { report, .. } => {
                tracing::info!(
                    generation = report.generation,
                    documents = report.documents,
                    history_entries = report.history_entries,
                    "Article collection migrated at start-up"
                );
            }
        }

        rebuild(&ctx).await?;

        let cancel = CancellationToken::new();
        let (followups, receiver) = mpsc::unbounded_channel();
        let runner = FollowUpRunner::new(Arc::clone(&ctx));
        let runner_task = tokio::spawn(runner.run(receiver, cancel.clone()));

        let articles = ArticleManager::new(Arc::clone(&ctx), followups);
        let correlation = CorrelationEngine::new(Arc::clone(&ctx), sources);

        tracing::info!(
            schema_generation = ctx.schema.generation(),
            articles = ctx.graph.current().article_count(),
            "Engine started"
        );

        Ok(Self {
            ctx,
            articles,
            correlation,
            cancel,
            tasks: vec![("follow-ups", runner_task)],
            serializer_task,
        })
    }

    /// Spawn the periodic index rebuild and unreviewed-count jobs.
    pub fn spawn_background(&mut self) {
        let index_task = tokio::spawn(run_index_rebuild(
            Arc::clone(&self.ctx),
            self.cancel.clone(),
        ));
        let count_task = tokio::spawn(run_unreviewed_count(
            Arc::clone(&self.ctx),
            self.cancel.clone(),
        ));
        self.tasks.push(("index-rebuild", index_task));
        self.tasks.push(("unreviewed-count", count_task));
    }

    pub fn articles(&self) -> &ArticleManager {
        &self.articles
    }

    pub fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn schema(&self) -> Arc<SchemaSnapshot> {
        self.ctx.schema.snapshot()
    }

    pub fn graph(&self) -> Arc<GraphIndex> {
        self.ctx.graph.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KbEvent> {
        self.ctx.bus.subscribe()
    }

    /// Rescan tag declarations through the write serializer.
    pub async fn reload_schema(&self, force_migration: bool) -> Result<ReloadOutcome, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .serializer
            .submit(async move { reload_schema(&ctx, force_migration).await })
            .await?
    }

    /// Build and publish a fresh graph index now.
    pub async fn rebuild_index(&self) -> Result<RebuildOutcome, EngineError> {
        Ok(rebuild(&self.ctx).await?)
    }

    /// Stop the runner and background jobs, then wait for queued writes.
    pub async fn shutdown(self) {
        let Self {
            ctx,
            articles,
            correlation,
            cancel,
            tasks,
            serializer_task,
        } = self;

        cancel.cancel();
        for (name, handle) in tasks {
            await_task(name, handle).await;
        }

        // The serializer worker exits once every handle to it is gone.
        drop(articles);
        drop(correlation);
        drop(ctx);
        await_task("write-serializer", serializer_task).await;
        tracing::info!("Engine stopped");
    }
}

async fn await_task(name: &'static str, handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task ended abnormally"),
        Err(_) => tracing::warn!(task = name, "Task did not stop within the shutdown timeout"),
    }
}
