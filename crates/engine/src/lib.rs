//! The wikigraph engine: article lifecycle, online schema migration,
//! derived graph index and correlation search.
//!
//! - [`Engine`]: start-up, background jobs and shutdown.
//! - [`ArticleManager`]: article writes (serialized) and reads.
//! - [`CorrelationEngine`]: free-text search across articles and identity
//!   sources.
//! - [`migrator`]: schema reload and the collection rebuild it triggers.
//! - [`index`]: the derived graph index and its builder.

pub mod background;
pub mod collections;
pub mod config;
pub mod context;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod followups;
pub mod index;
pub mod lifecycle;
pub mod migrator;
pub mod registry;
pub mod serializer;
pub mod sources;
pub mod upgrade;

pub use config::{ConfigError, EngineConfig};
pub use context::EngineContext;
pub use correlation::{CorrelationEngine, CorrelationResult, IntegrityError};
pub use engine::Engine;
pub use error::{EngineError, MigrationError};
pub use lifecycle::{ArticleManager, ArticleRecord, SaveOutcome};
pub use migrator::ReloadOutcome;
pub use sources::{IdentitySource, SearchOptions, StoreIdentitySource};
