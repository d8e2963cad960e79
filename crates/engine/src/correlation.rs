//! Correlation search across articles and identity sources.
//!
//! A free-text query runs against the article collection and every
//! identity source. Source hits already linked to an article (through the
//! source's identifier tag, as seen by the published graph index) are
//! reported as linked, and those articles are not repeated among the plain
//! article hits. Source hits nobody links to are candidates for new
//! articles.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use wikigraph_core::article::Article;
use wikigraph_core::slug::slugify;
use wikigraph_db::{Query, SearchRequest, Sort};

use crate::collections::READ_ALIAS;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::index::GraphIndex;
use crate::sources::{IdentitySource, SearchOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleHit {
    pub id: String,
    pub title: String,
}

/// A source object that existing articles already link to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedHit {
    pub source: String,
    pub identity_id: String,
    pub articles: Vec<String>,
}

/// A source object no article links to yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkedHit {
    pub source: String,
    pub identity_id: String,
    pub object: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrityError {
    /// One article carries several values of a single identifier tag.
    #[serde(rename_all = "camelCase")]
    MultipleTagsOfType {
        article_id: String,
        tag: String,
        values: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationResult {
    pub articles: Vec<ArticleHit>,
    pub linked: Vec<LinkedHit>,
    pub unlinked: Vec<UnlinkedHit>,
    pub integrity_errors: Vec<IntegrityError>,
}

pub struct CorrelationEngine {
    ctx: Arc<EngineContext>,
    sources: Vec<Arc<dyn IdentitySource>>,
}

impl CorrelationEngine {
    pub fn new(ctx: Arc<EngineContext>, sources: Vec<Arc<dyn IdentitySource>>) -> Self {
        Self { ctx, sources }
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.name())
    }

    pub async fn search(&self, query: &str) -> Result<CorrelationResult, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(CorrelationResult::default());
        }
        let graph = self.ctx.graph.current();
        let limit = self.ctx.config.search_limit;

        let mut result = CorrelationResult {
            articles: self.search_articles(query, limit).await?,
            ..CorrelationResult::default()
        };

        let opts = SearchOptions { limit };
        let mut linked_articles: HashSet<String> = HashSet::new();
        for source in &self.sources {
            let ids = match source.string_search(query, &opts).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Identity source search failed");
                    continue;
                }
            };
            for identity_id in ids {
                let owners = graph.articles_for_identity(source.id_tag_name(), &identity_id);
                if owners.is_empty() {
                    let object = match source.get_by_id(&identity_id).await {
                        Ok(object) => object,
                        Err(e) => {
                            tracing::warn!(source = source.name(), id = %identity_id, error = %e, "Identity lookup failed");
                            None
                        }
                    };
                    result.unlinked.push(UnlinkedHit {
                        source: source.name().to_string(),
                        identity_id,
                        object,
                    });
                } else {
                    let articles: Vec<String> = owners.iter().map(|id| id.to_string()).collect();
                    linked_articles.extend(articles.iter().cloned());
                    result.linked.push(LinkedHit {
                        source: source.name().to_string(),
                        identity_id,
                        articles,
                    });
                }
            }
        }

        result.articles.retain(|hit| !linked_articles.contains(&hit.id));
        result.integrity_errors = self.integrity_errors(&graph, &result, &linked_articles);

        tracing::debug!(
            query,
            articles = result.articles.len(),
            linked = result.linked.len(),
            unlinked = result.unlinked.len(),
            integrity_errors = result.integrity_errors.len(),
            "Correlation search complete"
        );
        Ok(result)
    }

    async fn search_articles(&self, query: &str, limit: usize) -> Result<Vec<ArticleHit>, EngineError> {
        let mut clauses = Vec::new();
        for state in ["reviewed", "unreviewed"] {
            clauses.push(Query::matches_text(format!("{state}.title"), query));
            clauses.push(Query::matches_text(format!("{state}.body"), query));
        }
        let slug = slugify(query);
        if !slug.is_empty() {
            clauses.push(Query::term("id", slug.as_str()));
            for state in ["reviewed", "unreviewed"] {
                clauses.push(Query::term(format!("{state}.allBaseTags"), slug.as_str()));
            }
        }

        let request = SearchRequest::new(Query::should(clauses), limit).sorted(Sort::asc("id"));
        let hits = self.ctx.store().search(READ_ALIAS, &request).await?.hits;
        Ok(hits
            .iter()
            .filter_map(|doc| match doc.parse::<Article>() {
                Ok(article) => Some(ArticleHit {
                    title: article.title().unwrap_or_default().to_string(),
                    id: article.id,
                }),
                Err(e) => {
                    tracing::debug!(id = %doc.id, error = %e, "Skipping unreadable article hit");
                    None
                }
            })
            .collect())
    }

    fn integrity_errors(
        &self,
        graph: &GraphIndex,
        result: &CorrelationResult,
        linked_articles: &HashSet<String>,
    ) -> Vec<IntegrityError> {
        let mut ids: Vec<&str> = result
            .articles
            .iter()
            .map(|hit| hit.id.as_str())
            .chain(linked_articles.iter().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mut errors = Vec::new();
        for id in ids {
            for source in &self.sources {
                let tag = source.id_tag_name();
                let values = graph.identity_values(id, tag);
                if values.len() > 1 {
                    tracing::warn!(article = id, tag, count = values.len(), "Article carries several identifiers of one kind");
                    errors.push(IntegrityError::MultipleTagsOfType {
                        article_id: id.to_string(),
                        tag: tag.to_string(),
                        values: values.iter().map(|v| v.to_string()).collect(),
                    });
                }
            }
        }
        errors
    }
}
