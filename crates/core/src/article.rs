//! The dual-state article document and its history entries.
//!
//! Persisted JSON uses camelCase field names. An article has an
//! authoritative `reviewed` state (absent until first approval) and a
//! pending `unreviewed` state; unreviewed saves accumulate in
//! `unreviewedHistory` until they are promoted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::{ArticleContent, Extracted, Relationships};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Review state
// ---------------------------------------------------------------------------

/// Which content state a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewState {
    Reviewed,
    Unreviewed,
    /// Keep whatever review state the article already had.
    Keep,
}

/// The `changeType` carried by `article-changed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    Created,
    CreatedNeedsReview,
    Updated,
    UpdatedNeedsReview,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CreatedNeedsReview => "created-needs-review",
            Self::Updated => "updated",
            Self::UpdatedNeedsReview => "updated-needs-review",
            Self::Deleted => "deleted",
        }
    }
}

// ---------------------------------------------------------------------------
// Content state
// ---------------------------------------------------------------------------

/// One content state (reviewed or unreviewed) with its derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentState {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub base_tags: Vec<String>,
    #[serde(default)]
    pub relationships: Relationships,
    #[serde(default)]
    pub body_referenced_articles: Vec<String>,
    #[serde(default)]
    pub body_referenced_hashtags: Vec<String>,
    #[serde(default)]
    pub all_base_tags: Vec<String>,
    pub updated_by: String,
    pub updated_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<Timestamp>,
}

impl ContentState {
    pub fn from_extracted(extracted: Extracted, user: &str, time: Timestamp) -> Self {
        Self {
            title: extracted.title,
            body: extracted.body,
            tags: extracted.tags,
            base_tags: extracted.base_tags,
            relationships: extracted.relationships,
            body_referenced_articles: extracted.body_referenced_articles,
            body_referenced_hashtags: extracted.body_referenced_hashtags,
            all_base_tags: extracted.all_base_tags,
            updated_by: user.to_string(),
            updated_time: time,
            created_by: None,
            created_time: None,
        }
    }

    /// Mark this state as created by `user` at `time` (reviewed states only).
    pub fn with_created(mut self, user: impl Into<String>, time: Timestamp) -> Self {
        self.created_by = Some(user.into());
        self.created_time = Some(time);
        self
    }

    /// Replace the derived fields, keeping authorship.
    pub fn rederive(&mut self, extracted: Extracted) {
        self.tags = extracted.tags;
        self.base_tags = extracted.base_tags;
        self.relationships = extracted.relationships;
        self.body_referenced_articles = extracted.body_referenced_articles;
        self.body_referenced_hashtags = extracted.body_referenced_hashtags;
        self.all_base_tags = extracted.all_base_tags;
    }

    pub fn content(&self) -> ArticleContent {
        ArticleContent {
            title: self.title.clone(),
            body: self.body.clone(),
            tags: self.tags.clone(),
        }
    }

    pub fn snapshot(&self) -> UnreviewedSnapshot {
        UnreviewedSnapshot {
            title: self.title.clone(),
            body: self.body.clone(),
            tags: self.tags.clone(),
            updated_by: self.updated_by.clone(),
            updated_time: self.updated_time,
        }
    }
}

/// An unreviewed save that has not been promoted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreviewedSnapshot {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub updated_by: String,
    pub updated_time: Timestamp,
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// A knowledge-base article as persisted in the article collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub uuid: Uuid,
    #[serde(default)]
    pub reviewed: Option<ContentState>,
    #[serde(default)]
    pub unreviewed: Option<ContentState>,
    #[serde(default)]
    pub unreviewed_pending: bool,
    #[serde(default)]
    pub unreviewed_history: Vec<UnreviewedSnapshot>,
}

impl Article {
    /// The state readers should see: reviewed when present, else unreviewed.
    pub fn current(&self) -> Option<&ContentState> {
        self.reviewed.as_ref().or(self.unreviewed.as_ref())
    }

    /// The state editors work on: unreviewed when present, else reviewed.
    pub fn latest(&self) -> Option<&ContentState> {
        self.unreviewed.as_ref().or(self.reviewed.as_ref())
    }

    pub fn title(&self) -> Option<&str> {
        self.current().map(|s| s.title.as_str())
    }

    pub fn is_reviewed(&self) -> bool {
        self.reviewed.is_some()
    }

    /// Whether the article satisfies the "at least one titled state" rule.
    pub fn is_well_formed(&self) -> bool {
        self.reviewed
            .iter()
            .chain(self.unreviewed.iter())
            .any(|s| !s.title.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Immutable snapshot of a committed reviewed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Time-ordered entry id (UUIDv7).
    pub entry_id: Uuid,
    /// The article's rename-stable uuid.
    pub uuid: Uuid,
    /// Article id at the time of the commit.
    pub article_id: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub updated_by: String,
    pub updated_time: Timestamp,
    /// Unreviewed saves folded into this commit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreviewed_history: Vec<UnreviewedSnapshot>,
}

impl HistoryEntry {
    /// Snapshot a reviewed state being committed.
    pub fn commit(
        article: &Article,
        state: &ContentState,
        unreviewed_history: Vec<UnreviewedSnapshot>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            uuid: article.uuid,
            article_id: article.id.clone(),
            title: state.title.clone(),
            body: state.body.clone(),
            tags: state.tags.clone(),
            updated_by: state.updated_by.clone(),
            updated_time: state.updated_time,
            unreviewed_history,
        }
    }
}
