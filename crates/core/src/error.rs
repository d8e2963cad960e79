#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Article title is missing")]
    MissingTitle,

    #[error("Article title is invalid: {0}")]
    InvalidTitle(String),

    #[error("Article body is missing")]
    MissingBody,

    #[error("Article tags are missing")]
    MissingTags,

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Article already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the caller can fix the request and resubmit it unchanged
    /// against the same stored state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::MissingTitle
                | CoreError::InvalidTitle(_)
                | CoreError::MissingBody
                | CoreError::MissingTags
                | CoreError::Validation(_)
        )
    }

    /// Whether the error signals a race with another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::AlreadyExists(_) | CoreError::VersionConflict { .. }
        )
    }
}
