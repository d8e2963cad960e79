//! Document-store capability for the knowledge base.
//!
//! The engine only sees [`DocumentStore`]. [`PgDocumentStore`] persists to
//! PostgreSQL JSONB tables; [`MemoryStore`] keeps everything in process.

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod pg;
pub mod query;
pub mod store;

pub use memory::MemoryStore;
pub use pg::PgDocumentStore;
pub use query::{Query, SearchRequest, Sort, TermBucket};
pub use store::{AliasAction, DocumentStore, ScanStream, SearchResult, StoreError, StoredDocument};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply the document-store schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
