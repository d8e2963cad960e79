//! The document-store capability the engine is written against.
//!
//! A store holds named physical indices of versioned JSON documents plus a
//! table of aliases pointing at them. Every index argument may name either
//! an alias or a physical index.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use wikigraph_core::types::Version;

use crate::query::{Query, SearchRequest, TermBucket};

/// Errors raised by a [`DocumentStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {index}/{id}")]
    NotFound { index: String, id: String },

    #[error("Document already exists: {index}/{id}")]
    AlreadyExists { index: String, id: String },

    #[error("Version conflict on {index}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        index: String,
        id: String,
        expected: Version,
        actual: Version,
    },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    #[error("Alias not found: {alias} -> {index}")]
    AliasNotFound { alias: String, index: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A document together with its store-assigned version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: Version,
    pub body: Value,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, version: Version, body: Value) -> Self {
        Self {
            id: id.into(),
            version,
            body,
        }
    }

    /// Deserialize the body into a typed document.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Result of a paged search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// Number of matching documents, ignoring paging.
    pub total: u64,
    pub hits: Vec<StoredDocument>,
}

/// One step of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    /// Point `alias` at `index`, replacing any previous target.
    Add { alias: String, index: String },
    /// Remove `alias`, which must currently point at `index`.
    Remove { alias: String, index: String },
}

impl AliasAction {
    pub fn add(alias: impl Into<String>, index: impl Into<String>) -> Self {
        Self::Add {
            alias: alias.into(),
            index: index.into(),
        }
    }

    pub fn remove(alias: impl Into<String>, index: impl Into<String>) -> Self {
        Self::Remove {
            alias: alias.into(),
            index: index.into(),
        }
    }
}

/// Pages of a full-collection scan, each at most `page_size` documents long.
pub type ScanStream<'a> = BoxStream<'a, Result<Vec<StoredDocument>, StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Indices and aliases
    // -----------------------------------------------------------------------

    async fn create_index(&self, index: &str) -> Result<(), StoreError>;

    /// Delete a physical index, its documents and any aliases onto it.
    async fn delete_index(&self, index: &str) -> Result<(), StoreError>;

    /// Whether `name` is an existing physical index or alias.
    async fn index_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Make all prior writes visible to readers.
    async fn refresh(&self, index: &str) -> Result<(), StoreError>;

    /// Apply all actions atomically: either every action takes effect or
    /// none does.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), StoreError>;

    /// The physical index an alias points at.
    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, StoreError>;

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Create a document at version 1. Fails if the id is taken.
    async fn create(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError>;

    /// Replace a document if its version still equals `expected`.
    async fn update(
        &self,
        index: &str,
        id: &str,
        body: Value,
        expected: Version,
    ) -> Result<Version, StoreError>;

    /// Create or replace a document unconditionally.
    async fn put(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, index: &str, id: &str) -> Result<bool, StoreError>;

    /// Write documents with their versions verbatim, replacing existing ones.
    async fn bulk_index(&self, index: &str, docs: Vec<StoredDocument>) -> Result<(), StoreError>;

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResult, StoreError>;

    async fn count(&self, index: &str, query: &Query) -> Result<u64, StoreError>;

    /// Number of matching documents per distinct value of `field`, largest
    /// buckets first (ties by key), at most `size` buckets.
    async fn terms_aggregation(
        &self,
        index: &str,
        query: &Query,
        field: &str,
        size: usize,
    ) -> Result<Vec<TermBucket>, StoreError>;

    /// Up to `limit` matching documents with id greater than `after`, in id
    /// order.
    async fn scan_page(
        &self,
        index: &str,
        filter: Option<&Query>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// Stream a full collection page by page. The next page is only fetched
    /// once the consumer has taken the previous one.
    fn scan<'a>(
        &'a self,
        index: &'a str,
        filter: Option<Query>,
        page_size: usize,
    ) -> ScanStream<'a> {
        let page_size = page_size.max(1);
        stream::try_unfold(Some(None::<String>), move |cursor| {
            let filter = filter.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok(None);
                };
                let page = self
                    .scan_page(index, filter.as_ref(), after.as_deref(), page_size)
                    .await?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = if page.len() < page_size {
                    None
                } else {
                    page.last().map(|d| Some(d.id.clone()))
                };
                Ok::<_, StoreError>(Some((page, next)))
            }
        })
        .boxed()
    }
}
