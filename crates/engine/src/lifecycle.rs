//! Article lifecycle: create, update, delete and the review workflow.
//!
//! Every write runs inside the write serializer. Validation happens twice:
//! once up front so malformed content fails without queueing, and again
//! inside the task against the schema in force when the write applies.
//! Successful writes publish their events and queue a [`FollowUp`].

use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;
use wikigraph_core::article::{Article, ChangeType, ContentState, HistoryEntry, ReviewState};
use wikigraph_core::diff::EntryDiff;
use wikigraph_core::error::CoreError;
use wikigraph_core::extract::{extract, ArticleContent, Extracted};
use wikigraph_core::schema::SchemaSnapshot;
use wikigraph_core::slug::slugify;
use wikigraph_core::tag::{stringify_tag, Tag};
use wikigraph_core::types::Version;
use wikigraph_db::{Query, SearchRequest, Sort, StoreError, StoredDocument, TermBucket};
use wikigraph_events::EventPayload;

use crate::collections::{HISTORY_COLLECTION, READ_ALIAS, WRITE_ALIAS};
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::followups::FollowUp;

/// Buckets returned by [`ArticleManager::tag_counts`].
const TAG_COUNT_BUCKETS: usize = 1000;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// An article with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub article: Article,
    pub version: Version,
}

/// List entry for searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub id: String,
    pub title: String,
    pub reviewed: bool,
    pub unreviewed_pending: bool,
    pub version: Version,
}

/// Another live article already holds a value of a unique tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueTagConflict {
    pub tag: String,
    pub value: String,
    pub articles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub article: Article,
    pub version: Version,
    pub change_type: ChangeType,
    /// The id before a rename.
    pub previous_id: Option<String>,
    /// Id of the history entry committed by this save.
    pub history_entry: Option<Uuid>,
    /// Typed tags whose values did not coerce.
    pub dropped_relationships: Vec<String>,
    pub unique_conflicts: Vec<UniqueTagConflict>,
    /// Set when a rename could not delete the old id.
    pub cleanup_error: Option<String>,
    /// Set when the article was saved but its history entry was not.
    pub history_error: Option<String>,
}

impl SaveOutcome {
    pub fn id(&self) -> &str {
        &self.article.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RejectOutcome {
    /// Pending changes were discarded; the reviewed state is current again.
    Reverted(SaveOutcome),
    /// The article was never reviewed and has been removed.
    Deleted(DeleteOutcome),
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Entry point for article reads and writes. Cheap to clone.
#[derive(Clone)]
pub struct ArticleManager {
    ctx: Arc<EngineContext>,
    followups: mpsc::UnboundedSender<FollowUp>,
}

impl ArticleManager {
    pub fn new(ctx: Arc<EngineContext>, followups: mpsc::UnboundedSender<FollowUp>) -> Self {
        Self { ctx, followups }
    }

    pub async fn create(
        &self,
        content: ArticleContent,
        user: &str,
        review: ReviewState,
    ) -> Result<SaveOutcome, EngineError> {
        extract(&content, &self.ctx.schema.snapshot())?;
        let ctx = Arc::clone(&self.ctx);
        let user = user.to_string();
        let outcome = self
            .ctx
            .serializer
            .submit(async move { create_article(&ctx, content, &user, review).await })
            .await??;
        self.after_write(outcome.id());
        Ok(outcome)
    }

    /// Replace an article's content. A title whose slug differs from `id`
    /// renames the article.
    pub async fn update(
        &self,
        id: &str,
        expected_version: Version,
        content: ArticleContent,
        user: &str,
        review: ReviewState,
    ) -> Result<SaveOutcome, EngineError> {
        extract(&content, &self.ctx.schema.snapshot())?;
        let ctx = Arc::clone(&self.ctx);
        let (id, user) = (id.to_string(), user.to_string());
        let outcome = self
            .ctx
            .serializer
            .submit(async move {
                update_article(&ctx, &id, expected_version, content, &user, review).await
            })
            .await??;
        self.after_write(outcome.id());
        Ok(outcome)
    }

    /// Remove an article. History entries are kept.
    pub async fn delete(&self, id: &str, user: &str) -> Result<DeleteOutcome, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let (id, user) = (id.to_string(), user.to_string());
        let outcome = self
            .ctx
            .serializer
            .submit(async move {
                let stored = load(&ctx, &id).await?;
                let article: Article = stored.parse()?;
                delete_article(&ctx, &article, &user).await
            })
            .await??;
        self.after_write(&outcome.id);
        Ok(outcome)
    }

    /// Promote the pending unreviewed state to reviewed.
    pub async fn approve(
        &self,
        id: &str,
        expected_version: Version,
        user: &str,
    ) -> Result<SaveOutcome, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let (id, user) = (id.to_string(), user.to_string());
        let outcome = self
            .ctx
            .serializer
            .submit(async move {
                let (article, _) = load_versioned(&ctx, &id, expected_version).await?;
                let pending = pending_state(&article)?;
                update_article(
                    &ctx,
                    &id,
                    expected_version,
                    pending.content(),
                    &user,
                    ReviewState::Reviewed,
                )
                .await
            })
            .await??;
        self.after_write(outcome.id());
        Ok(outcome)
    }

    /// Discard pending unreviewed changes. An article that was never
    /// reviewed is deleted.
    pub async fn reject(
        &self,
        id: &str,
        expected_version: Version,
        user: &str,
    ) -> Result<RejectOutcome, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let (id, user) = (id.to_string(), user.to_string());
        let outcome = self
            .ctx
            .serializer
            .submit(async move { reject_article(&ctx, &id, expected_version, &user).await })
            .await??;
        match &outcome {
            RejectOutcome::Reverted(saved) => self.after_write(saved.id()),
            RejectOutcome::Deleted(deleted) => self.after_write(&deleted.id),
        }
        Ok(outcome)
    }

    fn after_write(&self, id: &str) {
        if self
            .followups
            .send(FollowUp::ArticleWritten { id: id.to_string() })
            .is_err()
        {
            tracing::debug!(id, "Follow-up runner is gone, skipping write follow-ups");
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: &str) -> Result<Option<ArticleRecord>, EngineError> {
        match self.ctx.store().get(READ_ALIAS, id).await? {
            Some(doc) => Ok(Some(ArticleRecord {
                article: doc.parse()?,
                version: doc.version,
            })),
            None => Ok(None),
        }
    }

    /// Look an article up by title, id or alias.
    pub async fn resolve(&self, reference: &str) -> Result<Option<ArticleRecord>, EngineError> {
        let id = slugify(reference);
        if !id.is_empty() {
            if let Some(record) = self.get(&id).await? {
                return Ok(Some(record));
            }
        }
        let target = self
            .ctx
            .graph
            .current()
            .resolve_alias(reference)
            .map(str::to_string);
        match target {
            Some(target) => self.get(&target).await,
            None => Ok(None),
        }
    }

    /// Articles with pending unreviewed changes, by id.
    pub async fn list_unreviewed(&self) -> Result<Vec<ArticleSummary>, EngineError> {
        let request = SearchRequest::new(
            Query::term("unreviewedPending", true),
            self.ctx.config.search_limit,
        )
        .sorted(Sort::asc("id"));
        let result = self.ctx.store().search(READ_ALIAS, &request).await?;
        summaries(&result.hits)
    }

    pub async fn unreviewed_count(&self) -> Result<u64, EngineError> {
        Ok(unreviewed_count(&self.ctx).await?)
    }

    /// Committed versions of an article, oldest first.
    pub async fn history(&self, uuid: Uuid) -> Result<Vec<HistoryEntry>, EngineError> {
        let filter = Query::term("uuid", uuid.to_string());
        let pages = self.ctx.store().scan(
            HISTORY_COLLECTION,
            Some(filter),
            self.ctx.config.scan_page_size,
        );
        let pages: Vec<Vec<StoredDocument>> = pages.try_collect().await?;
        let mut entries = pages
            .iter()
            .flatten()
            .map(StoredDocument::parse::<HistoryEntry>)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.entry_id);
        Ok(entries)
    }

    /// Line diff between two history entries, older to newer.
    pub async fn history_diff(&self, a: Uuid, b: Uuid) -> Result<EntryDiff, EngineError> {
        let first = self.history_entry(a).await?;
        let second = self.history_entry(b).await?;
        let (older, newer) = if first.entry_id <= second.entry_id {
            (first, second)
        } else {
            (second, first)
        };
        Ok(EntryDiff::between(&older, &newer))
    }

    async fn history_entry(&self, entry_id: Uuid) -> Result<HistoryEntry, EngineError> {
        let id = entry_id.to_string();
        match self.ctx.store().get(HISTORY_COLLECTION, &id).await? {
            Some(doc) => Ok(doc.parse()?),
            None => Err(CoreError::NotFound {
                entity: "history entry",
                id,
            }
            .into()),
        }
    }

    /// Articles carrying a tag, optionally with a specific value. Values of
    /// typed tags are coerced the same way saves coerce them.
    pub async fn search_by_tag(
        &self,
        name: &str,
        value: Option<&str>,
    ) -> Result<Vec<ArticleSummary>, EngineError> {
        let name = name.trim().to_lowercase();
        let query = match value {
            None => either_state(|state| Query::term(format!("{state}.allBaseTags"), name.as_str())),
            Some(raw) => match self.ctx.schema.snapshot().tag_type(&name) {
                Some(tag_type) => {
                    let value = tag_type
                        .coerce(Some(raw))
                        .map_err(|e| CoreError::Validation(format!("{name}: {e}")))?
                        .to_json();
                    either_state(|state| {
                        Query::term(format!("{state}.relationships.{name}"), value.clone())
                    })
                }
                None => {
                    let rendered = stringify_tag(&Tag::with_value(name.as_str(), raw.trim()));
                    either_state(|state| {
                        Query::should([
                            Query::term(format!("{state}.tags"), rendered.as_str()),
                            Query::term(format!("{state}.bodyReferencedHashtags"), rendered.as_str()),
                        ])
                    })
                }
            },
        };

        let request = SearchRequest::new(query, self.ctx.config.search_limit).sorted(Sort::asc("id"));
        let result = self.ctx.store().search(READ_ALIAS, &request).await?;
        summaries(&result.hits)
    }

    /// Number of articles per base tag, largest first.
    pub async fn tag_counts(&self) -> Result<Vec<TermBucket>, EngineError> {
        Ok(self
            .ctx
            .store()
            .terms_aggregation(READ_ALIAS, &Query::All, "unreviewed.allBaseTags", TAG_COUNT_BUCKETS)
            .await?)
    }
}

// ---------------------------------------------------------------------------
// Serialized write tasks
// ---------------------------------------------------------------------------

async fn create_article(
    ctx: &EngineContext,
    content: ArticleContent,
    user: &str,
    review: ReviewState,
) -> Result<SaveOutcome, EngineError> {
    let schema = ctx.schema.snapshot();
    let extracted = extract(&content, &schema)?;
    let dropped_relationships = dropped(&extracted);
    let id = extracted.id.clone();
    let store = ctx.store();

    if store.get(WRITE_ALIAS, &id).await?.is_some() {
        return Err(CoreError::AlreadyExists(id).into());
    }

    let reviewed = review == ReviewState::Reviewed;
    let now = Utc::now();
    let state = ContentState::from_extracted(extracted, user, now);
    let mut article = Article {
        id: id.clone(),
        uuid: Uuid::new_v4(),
        reviewed: None,
        unreviewed: None,
        unreviewed_pending: !reviewed,
        unreviewed_history: Vec::new(),
    };

    let mut entry = None;
    if reviewed {
        let committed = state.clone().with_created(user, now);
        entry = Some(HistoryEntry::commit(&article, &committed, Vec::new()));
        article.reviewed = Some(committed);
    } else {
        article.unreviewed_history.push(state.snapshot());
    }
    article.unreviewed = Some(state);

    let version = store
        .create(WRITE_ALIAS, &id, to_body(&article)?)
        .await
        .map_err(EngineError::from_article_store)?;
    let history_error = record_history(ctx, entry.as_ref()).await;

    let change_type = if reviewed {
        ChangeType::Created
    } else {
        ChangeType::CreatedNeedsReview
    };
    let title = article.title().unwrap_or_default().to_string();
    tracing::info!(id = %id, version, change_type = change_type.as_str(), user, "Article created");
    ctx.bus.publish(if reviewed {
        EventPayload::ArticleCreated {
            id: id.clone(),
            title: title.clone(),
            user: user.to_string(),
        }
    } else {
        EventPayload::ArticleCreatedNeedsReview {
            id: id.clone(),
            title: title.clone(),
            user: user.to_string(),
        }
    });
    ctx.bus.publish(EventPayload::ArticleChanged {
        id,
        old_id: None,
        old_title: None,
        title,
        user: user.to_string(),
        change_type,
    });

    let unique_conflicts = unique_conflicts(ctx, &article, &schema).await;
    Ok(SaveOutcome {
        article,
        version,
        change_type,
        previous_id: None,
        history_entry: entry.map(|e| e.entry_id),
        dropped_relationships,
        unique_conflicts,
        cleanup_error: None,
        history_error,
    })
}

async fn update_article(
    ctx: &EngineContext,
    id: &str,
    expected: Version,
    content: ArticleContent,
    user: &str,
    review: ReviewState,
) -> Result<SaveOutcome, EngineError> {
    let (mut article, _) = load_versioned(ctx, id, expected).await?;
    let schema = ctx.schema.snapshot();
    let extracted = extract(&content, &schema)?;
    let dropped_relationships = dropped(&extracted);
    let new_id = extracted.id.clone();
    let renamed = new_id != id;
    let store = ctx.store();

    if renamed && store.get(WRITE_ALIAS, &new_id).await?.is_some() {
        return Err(CoreError::AlreadyExists(new_id).into());
    }

    let target = match review {
        ReviewState::Keep if article.unreviewed_pending || article.reviewed.is_none() => {
            ReviewState::Unreviewed
        }
        ReviewState::Keep => ReviewState::Reviewed,
        other => other,
    };

    let old_title = article.title().map(str::to_string);
    let now = Utc::now();
    let state = ContentState::from_extracted(extracted, user, now);
    article.id = new_id.clone();

    let (change_type, entry) = if target == ReviewState::Reviewed {
        let (created_by, created_time) = article
            .reviewed
            .as_ref()
            .and_then(|r| Some((r.created_by.clone()?, r.created_time?)))
            .unwrap_or_else(|| (user.to_string(), now));
        let committed = state.clone().with_created(created_by, created_time);
        let pending = std::mem::take(&mut article.unreviewed_history);
        let entry = HistoryEntry::commit(&article, &committed, pending);
        article.reviewed = Some(committed);
        article.unreviewed = Some(state);
        article.unreviewed_pending = false;
        (ChangeType::Updated, Some(entry))
    } else {
        article.unreviewed_history.push(state.snapshot());
        article.unreviewed = Some(state);
        article.unreviewed_pending = true;
        (ChangeType::UpdatedNeedsReview, None)
    };

    let body = to_body(&article)?;
    let (version, cleanup_error) = if renamed {
        move_article(ctx, id, &new_id, body).await?
    } else {
        let version = store
            .update(WRITE_ALIAS, id, body, expected)
            .await
            .map_err(EngineError::from_article_store)?;
        (version, None)
    };
    let history_error = record_history(ctx, entry.as_ref()).await;

    let title = article.title().unwrap_or_default().to_string();
    tracing::info!(
        id = %new_id,
        previous_id = renamed.then_some(id),
        version,
        change_type = change_type.as_str(),
        user,
        "Article updated"
    );
    ctx.bus.publish(EventPayload::ArticleChanged {
        id: new_id,
        old_id: renamed.then(|| id.to_string()),
        old_title: old_title.filter(|old| *old != title),
        title,
        user: user.to_string(),
        change_type,
    });

    let unique_conflicts = unique_conflicts(ctx, &article, &schema).await;
    Ok(SaveOutcome {
        article,
        version,
        change_type,
        previous_id: renamed.then(|| id.to_string()),
        history_entry: entry.map(|e| e.entry_id),
        dropped_relationships,
        unique_conflicts,
        cleanup_error,
        history_error,
    })
}

async fn delete_article(
    ctx: &EngineContext,
    article: &Article,
    user: &str,
) -> Result<DeleteOutcome, EngineError> {
    let id = article.id.clone();
    if !ctx.store().delete(WRITE_ALIAS, &id).await? {
        return Err(CoreError::NotFound {
            entity: "article",
            id,
        }
        .into());
    }
    let title = article.title().map(str::to_string);
    tracing::info!(id = %id, user, "Article deleted");
    ctx.bus.publish(EventPayload::ArticleDeleted {
        id: id.clone(),
        title: title.clone(),
        user: user.to_string(),
    });
    ctx.bus.publish(EventPayload::ArticleChanged {
        id: id.clone(),
        old_id: None,
        old_title: None,
        title: title.clone().unwrap_or_default(),
        user: user.to_string(),
        change_type: ChangeType::Deleted,
    });
    Ok(DeleteOutcome { id, title })
}

async fn reject_article(
    ctx: &EngineContext,
    id: &str,
    expected: Version,
    user: &str,
) -> Result<RejectOutcome, EngineError> {
    let (mut article, _) = load_versioned(ctx, id, expected).await?;
    pending_state(&article)?;

    let Some(reviewed) = article.reviewed.clone() else {
        return Ok(RejectOutcome::Deleted(
            delete_article(ctx, &article, user).await?,
        ));
    };

    // A pending rename is undone along with the rest of the pending content.
    let reviewed_id = slugify(&reviewed.title);
    let renamed = reviewed_id != id;
    if renamed && ctx.store().get(WRITE_ALIAS, &reviewed_id).await?.is_some() {
        return Err(CoreError::AlreadyExists(reviewed_id).into());
    }

    let pending_title = article.unreviewed.as_ref().map(|s| s.title.clone());
    let mut restored = reviewed;
    restored.created_by = None;
    restored.created_time = None;
    article.id = reviewed_id.clone();
    article.unreviewed = Some(restored);
    article.unreviewed_pending = false;
    let discarded = std::mem::take(&mut article.unreviewed_history);

    let body = to_body(&article)?;
    let (version, cleanup_error) = if renamed {
        move_article(ctx, id, &reviewed_id, body).await?
    } else {
        let version = ctx
            .store()
            .update(WRITE_ALIAS, id, body, expected)
            .await
            .map_err(EngineError::from_article_store)?;
        (version, None)
    };

    let title = article.title().unwrap_or_default().to_string();
    tracing::info!(
        id = %reviewed_id,
        previous_id = renamed.then_some(id),
        version,
        discarded = discarded.len(),
        user,
        "Pending changes rejected"
    );
    ctx.bus.publish(EventPayload::ArticleChanged {
        id: reviewed_id,
        old_id: renamed.then(|| id.to_string()),
        old_title: pending_title.filter(|old| *old != title),
        title,
        user: user.to_string(),
        change_type: ChangeType::Updated,
    });

    Ok(RejectOutcome::Reverted(SaveOutcome {
        article,
        version,
        change_type: ChangeType::Updated,
        previous_id: renamed.then(|| id.to_string()),
        history_entry: None,
        dropped_relationships: Vec::new(),
        unique_conflicts: Vec::new(),
        cleanup_error,
        history_error: None,
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load(ctx: &EngineContext, id: &str) -> Result<StoredDocument, EngineError> {
    ctx.store()
        .get(WRITE_ALIAS, id)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound {
                entity: "article",
                id: id.to_string(),
            }
            .into()
        })
}

/// Load an article and check the caller's version against the stored one.
async fn load_versioned(
    ctx: &EngineContext,
    id: &str,
    expected: Version,
) -> Result<(Article, Version), EngineError> {
    let stored = load(ctx, id).await?;
    if stored.version != expected {
        return Err(CoreError::VersionConflict {
            id: id.to_string(),
            expected,
            actual: stored.version,
        }
        .into());
    }
    Ok((stored.parse()?, stored.version))
}

fn pending_state(article: &Article) -> Result<&ContentState, EngineError> {
    match (&article.unreviewed, article.unreviewed_pending) {
        (Some(state), true) => Ok(state),
        _ => Err(CoreError::Validation(format!(
            "article {} has no pending changes",
            article.id
        ))
        .into()),
    }
}

fn to_body(article: &Article) -> Result<Value, EngineError> {
    serde_json::to_value(article).map_err(|e| EngineError::Store(StoreError::from(e)))
}

/// Create the article under `new_id`, then drop `old_id`. A failure to drop
/// the old id is returned alongside the new version; the move still counts.
async fn move_article(
    ctx: &EngineContext,
    old_id: &str,
    new_id: &str,
    body: Value,
) -> Result<(Version, Option<String>), EngineError> {
    let store = ctx.store();
    let version = store
        .create(WRITE_ALIAS, new_id, body)
        .await
        .map_err(EngineError::from_article_store)?;
    let cleanup_error = match store.delete(WRITE_ALIAS, old_id).await {
        Ok(true) => None,
        Ok(false) => {
            tracing::warn!(old_id, new_id, "Old id vanished during rename");
            None
        }
        Err(e) => {
            tracing::error!(old_id, new_id, error = %e, "Renamed article, but the old id could not be deleted");
            Some(e.to_string())
        }
    };
    Ok((version, cleanup_error))
}

/// Write the history entry of a save whose article document has already
/// landed. Failures are logged and reported on the outcome.
async fn record_history(ctx: &EngineContext, entry: Option<&HistoryEntry>) -> Option<String> {
    let entry = entry?;
    match write_history(ctx, entry).await {
        Ok(()) => None,
        Err(e) => {
            tracing::error!(
                id = %entry.article_id,
                entry_id = %entry.entry_id,
                error = %e,
                "Article saved, but its history entry could not be written"
            );
            Some(e.to_string())
        }
    }
}

async fn write_history(ctx: &EngineContext, entry: &HistoryEntry) -> Result<(), EngineError> {
    let body = serde_json::to_value(entry).map_err(StoreError::from)?;
    ctx.store()
        .put(HISTORY_COLLECTION, &entry.entry_id.to_string(), body)
        .await?;
    Ok(())
}

fn dropped(extracted: &Extracted) -> Vec<String> {
    extracted
        .dropped
        .iter()
        .map(|d| {
            tracing::debug!(tag = %d.tag, reason = %d.reason, "Typed tag value not promoted");
            d.tag.clone()
        })
        .collect()
}

fn summaries(hits: &[StoredDocument]) -> Result<Vec<ArticleSummary>, EngineError> {
    hits.iter()
        .map(|doc| {
            let article: Article = doc.parse()?;
            Ok(ArticleSummary {
                title: article.title().unwrap_or_default().to_string(),
                reviewed: article.is_reviewed(),
                unreviewed_pending: article.unreviewed_pending,
                version: doc.version,
                id: article.id,
            })
        })
        .collect()
}

/// A query matching when `clause` matches either content state.
fn either_state(clause: impl Fn(&str) -> Query) -> Query {
    Query::should([clause("reviewed"), clause("unreviewed")])
}

pub(crate) async fn unreviewed_count(ctx: &EngineContext) -> Result<u64, StoreError> {
    ctx.store()
        .count(READ_ALIAS, &Query::term("unreviewedPending", true))
        .await
}

/// Other live articles sharing a value of a unique tag with `article`.
/// Lookup failures are logged; they never fail the save.
async fn unique_conflicts(
    ctx: &EngineContext,
    article: &Article,
    schema: &SchemaSnapshot,
) -> Vec<UniqueTagConflict> {
    let Some(state) = article.latest() else {
        return Vec::new();
    };
    let mut conflicts = Vec::new();

    for tag in schema.unique_tags() {
        let Some(values) = state.relationships.get(tag) else {
            continue;
        };
        for value in values {
            let json = value.to_json();
            let query = Query::Bool {
                must: vec![either_state(|s| {
                    Query::must([
                        Query::term(format!("{s}.relationships.{tag}"), json.clone()),
                        Query::term(format!("{s}.allBaseTags"), tag),
                    ])
                })],
                should: Vec::new(),
                must_not: vec![Query::term("id", article.id.as_str())],
            };
            let request = SearchRequest::new(query, ctx.config.search_limit).sorted(Sort::asc("id"));
            match ctx.store().search(WRITE_ALIAS, &request).await {
                Ok(result) if result.total > 0 => {
                    let articles: Vec<String> = result.hits.into_iter().map(|d| d.id).collect();
                    tracing::warn!(
                        id = %article.id,
                        tag,
                        value = %value,
                        others = ?articles,
                        "Unique tag value already used"
                    );
                    conflicts.push(UniqueTagConflict {
                        tag: tag.to_string(),
                        value: value.to_string(),
                        articles,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(id = %article.id, tag, error = %e, "Unique tag check failed");
                }
            }
        }
    }
    conflicts
}
