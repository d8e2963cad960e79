use wikigraph_core::error::CoreError;
use wikigraph_db::StoreError;

/// Errors returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schema migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("Write serializer is closed")]
    SerializerClosed,

    #[error("Serialized task panicked")]
    TaskPanicked,
}

impl EngineError {
    /// Map a store error on the article collection to the domain error a
    /// caller can act on.
    pub(crate) fn from_article_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => CoreError::NotFound {
                entity: "article",
                id,
            }
            .into(),
            StoreError::AlreadyExists { id, .. } => CoreError::AlreadyExists(id).into(),
            StoreError::VersionConflict {
                id,
                expected,
                actual,
                ..
            } => CoreError::VersionConflict {
                id,
                expected,
                actual,
            }
            .into(),
            other => Self::Store(other),
        }
    }

    /// The domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised while rebuilding the article collection.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Failure before the alias flip; the old collection stays authoritative.
    #[error("streaming into the new collection failed: {0}")]
    Stream(StoreError),

    /// Failure during the alias flip; reads and writes may be split.
    #[error("alias flip failed: {0}")]
    AliasFlip(StoreError),

    #[error("collection bootstrap failed: {0}")]
    Bootstrap(StoreError),

    #[error("alias {0} does not exist")]
    MissingAlias(&'static str),

    #[error("migration target {0} is the live collection")]
    TargetIsLive(String),
}

impl MigrationError {
    /// Whether the failure needs an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AliasFlip(_))
    }
}
