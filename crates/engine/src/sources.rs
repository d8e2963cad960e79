//! Identity-source adapters.
//!
//! An identity source is an external inventory (directory, endpoint
//! protection) whose objects articles link to through an identifier tag.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use wikigraph_core::directory::{
    DIRECTORY_COLLECTION, DIRECTORY_ID_TAG, ENDPOINT_COLLECTION, ENDPOINT_ID_TAG,
};
use wikigraph_db::{DocumentStore, Query, SearchRequest, Sort, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { limit: 50 }
    }
}

#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Display name, e.g. `"directory"`.
    fn name(&self) -> &str;

    /// Tag linking an article to one of this source's objects.
    fn id_tag_name(&self) -> &str;

    /// Ids of objects matching free text.
    async fn string_search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<String>, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Value>, StoreError>;
}

/// An identity source backed by a store collection whose document ids are
/// the object identifiers.
pub struct StoreIdentitySource {
    name: &'static str,
    collection: &'static str,
    id_field: &'static str,
    id_tag: &'static str,
    search_fields: &'static [&'static str],
    store: Arc<dyn DocumentStore>,
}

impl StoreIdentitySource {
    /// Directory objects keyed by `objectGuid`, linked with `ad-guid`.
    pub fn directory(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: "directory",
            collection: DIRECTORY_COLLECTION,
            id_field: "objectGuid",
            id_tag: DIRECTORY_ID_TAG,
            search_fields: &[
                "distinguishedName",
                "samAccountName",
                "dnsHostName",
                "objectSid",
            ],
            store,
        }
    }

    /// Endpoint devices keyed by `hardwareKey`, linked with `sep-id`.
    pub fn endpoint_protection(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: "endpoint-protection",
            collection: ENDPOINT_COLLECTION,
            id_field: "hardwareKey",
            id_tag: ENDPOINT_ID_TAG,
            search_fields: &["computerName", "dnsName", "macAddresses", "ipAddresses"],
            store,
        }
    }
}

#[async_trait]
impl IdentitySource for StoreIdentitySource {
    fn name(&self) -> &str {
        self.name
    }

    fn id_tag_name(&self) -> &str {
        self.id_tag
    }

    async fn string_search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<String>, StoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let clauses = std::iter::once(Query::term(self.id_field, query))
            .chain(
                self.search_fields
                    .iter()
                    .map(|field| Query::matches_text(*field, query)),
            );
        let request = SearchRequest::new(Query::should(clauses), opts.limit).sorted(Sort::asc(self.id_field));
        let result = match self.store.search(self.collection, &request).await {
            Ok(result) => result,
            Err(StoreError::IndexNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(result
            .hits
            .into_iter()
            .map(|doc| {
                doc.body
                    .get(self.id_field)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(doc.id)
            })
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        match self.store.get(self.collection, id).await {
            Ok(doc) => Ok(doc.map(|d| d.body)),
            Err(StoreError::IndexNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The identity sources backed by the collaborator collections.
pub fn default_sources(store: &Arc<dyn DocumentStore>) -> Vec<Arc<dyn IdentitySource>> {
    vec![
        Arc::new(StoreIdentitySource::directory(Arc::clone(store))),
        Arc::new(StoreIdentitySource::endpoint_protection(Arc::clone(store))),
    ]
}
