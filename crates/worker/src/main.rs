use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wikigraph_db::PgDocumentStore;
use wikigraph_engine::{config, Engine, EngineConfig};
use wikigraph_events::{EventBus, EventLogger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wikigraph_worker=debug,wikigraph_engine=debug,wikigraph_db=info".into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let engine_config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        index_rebuild_interval_secs = engine_config.index_rebuild_interval.as_secs(),
        scan_page_size = engine_config.scan_page_size,
        retain_previous_collection = engine_config.retain_previous_collection,
        "Loaded engine configuration"
    );

    // --- Database ---
    let database_url = config::required("DATABASE_URL")?;

    let pool = wikigraph_db::create_pool(&database_url, engine_config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    wikigraph_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    wikigraph_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::new(engine_config.event_bus_capacity));
    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe()));

    // --- Engine ---
    let store = Arc::new(PgDocumentStore::new(pool.clone()));
    let mut engine = Engine::start(store, Arc::clone(&event_bus), engine_config)
        .await
        .context("Failed to start the knowledge-base engine")?;
    engine.spawn_background();
    tracing::info!(
        articles = engine.graph().article_count(),
        tag_types = engine.schema().definitions().len(),
        "Worker ready"
    );

    shutdown_signal().await;

    // --- Shutdown ---
    engine.shutdown().await;

    // Dropping the last bus handle closes the channel and stops the logger.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
