//! In-memory [`DocumentStore`] for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use wikigraph_core::types::Version;

use crate::query::{bucket_key, compare, leaves, Query, SearchRequest, TermBucket};
use crate::store::{AliasAction, DocumentStore, SearchResult, StoreError, StoredDocument};

type Index = BTreeMap<String, (Version, Value)>;

#[derive(Debug, Default)]
struct State {
    indices: HashMap<String, Index>,
    aliases: HashMap<String, String>,
}

impl State {
    fn resolve(&self, name: &str) -> Result<String, StoreError> {
        if let Some(index) = self.aliases.get(name) {
            return Ok(index.clone());
        }
        if self.indices.contains_key(name) {
            return Ok(name.to_string());
        }
        Err(StoreError::IndexNotFound(name.to_string()))
    }

    fn index(&self, name: &str) -> Result<&Index, StoreError> {
        let physical = self.resolve(name)?;
        self.indices
            .get(&physical)
            .ok_or(StoreError::IndexNotFound(physical))
    }

    fn index_mut(&mut self, name: &str) -> Result<(String, &mut Index), StoreError> {
        let physical = self.resolve(name)?;
        match self.indices.get_mut(&physical) {
            Some(index) => Ok((physical, index)),
            None => Err(StoreError::IndexNotFound(physical)),
        }
    }
}

/// A [`DocumentStore`] backed by maps behind a tokio `RwLock`.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all physical indices, sorted.
    pub async fn index_names(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.indices.keys().cloned().collect();
        names.sort();
        names
    }
}

fn matching<'a>(index: &'a Index, query: &'a Query) -> impl Iterator<Item = (&'a String, &'a (Version, Value))> {
    index.iter().filter(move |(_, (_, body))| query.matches(body))
}

fn stored(id: &str, (version, body): &(Version, Value)) -> StoredDocument {
    StoredDocument::new(id, *version, body.clone())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_index(&self, index: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(StoreError::IndexExists(index.to_string()));
        }
        state.indices.insert(index.to_string(), Index::new());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.indices.remove(index).is_none() {
            return Err(StoreError::IndexNotFound(index.to_string()));
        }
        state.aliases.retain(|_, target| target != index);
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().await.resolve(name).is_ok())
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        self.state.read().await.resolve(index).map(|_| ())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut aliases = state.aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add { alias, index } => {
                    if !state.indices.contains_key(index) {
                        return Err(StoreError::IndexNotFound(index.clone()));
                    }
                    aliases.insert(alias.clone(), index.clone());
                }
                AliasAction::Remove { alias, index } => {
                    if aliases.get(alias) != Some(index) {
                        return Err(StoreError::AliasNotFound {
                            alias: alias.clone(),
                            index: index.clone(),
                        });
                    }
                    aliases.remove(alias);
                }
            }
        }
        state.aliases = aliases;
        Ok(())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.aliases.get(alias).cloned())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let state = self.state.read().await;
        Ok(state.index(index)?.get(id).map(|entry| stored(id, entry)))
    }

    async fn create(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError> {
        let mut state = self.state.write().await;
        let (physical, docs) = state.index_mut(index)?;
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                index: physical,
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), (1, body));
        Ok(1)
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        body: Value,
        expected: Version,
    ) -> Result<Version, StoreError> {
        let mut state = self.state.write().await;
        let (physical, docs) = state.index_mut(index)?;
        let Some(entry) = docs.get_mut(id) else {
            return Err(StoreError::NotFound {
                index: physical,
                id: id.to_string(),
            });
        };
        if entry.0 != expected {
            return Err(StoreError::VersionConflict {
                index: physical,
                id: id.to_string(),
                expected,
                actual: entry.0,
            });
        }
        *entry = (expected + 1, body);
        Ok(expected + 1)
    }

    async fn put(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError> {
        let mut state = self.state.write().await;
        let (_, docs) = state.index_mut(index)?;
        let version = docs.get(id).map_or(1, |(v, _)| v + 1);
        docs.insert(id.to_string(), (version, body));
        Ok(version)
    }

    async fn delete(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let (_, docs) = state.index_mut(index)?;
        Ok(docs.remove(id).is_some())
    }

    async fn bulk_index(&self, index: &str, batch: Vec<StoredDocument>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let (_, docs) = state.index_mut(index)?;
        for doc in batch {
            docs.insert(doc.id, (doc.version, doc.body));
        }
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResult, StoreError> {
        let state = self.state.read().await;
        let docs = state.index(index)?;
        let mut hits: Vec<(&String, &(Version, Value))> = matching(docs, &request.query).collect();

        if let Some(sort) = &request.sort {
            // Documents missing the sort field go last in either direction.
            let key = |body: &Value| leaves(body, &sort.field).next().cloned();
            hits.sort_by(|(a_id, (_, a)), (b_id, (_, b))| {
                let ordering = match (key(a), key(b)) {
                    (Some(x), Some(y)) => {
                        let o = compare(&x, &y).unwrap_or(std::cmp::Ordering::Equal);
                        if sort.descending {
                            o.reverse()
                        } else {
                            o
                        }
                    }
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                ordering.then_with(|| a_id.cmp(b_id))
            });
        }

        Ok(SearchResult {
            total: hits.len() as u64,
            hits: hits
                .into_iter()
                .skip(request.from)
                .take(request.size)
                .map(|(id, entry)| stored(id, entry))
                .collect(),
        })
    }

    async fn count(&self, index: &str, query: &Query) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(matching(state.index(index)?, query).count() as u64)
    }

    async fn terms_aggregation(
        &self,
        index: &str,
        query: &Query,
        field: &str,
        size: usize,
    ) -> Result<Vec<TermBucket>, StoreError> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for (_, (_, body)) in matching(state.index(index)?, query) {
            let mut keys: Vec<String> = leaves(body, field).filter_map(bucket_key).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                *counts.entry(key).or_default() += 1;
            }
        }

        let mut buckets: Vec<TermBucket> = counts
            .into_iter()
            .map(|(key, doc_count)| TermBucket { key, doc_count })
            .collect();
        buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
        buckets.truncate(size);
        Ok(buckets)
    }

    async fn scan_page(
        &self,
        index: &str,
        filter: Option<&Query>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        use std::ops::Bound;

        let state = self.state.read().await;
        let docs = state.index(index)?;
        let lower = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        Ok(docs
            .range((lower, Bound::Unbounded))
            .filter(|(_, (_, body))| filter.map_or(true, |q| q.matches(body)))
            .take(limit)
            .map(|(id, entry)| stored(id, entry))
            .collect())
    }
}
