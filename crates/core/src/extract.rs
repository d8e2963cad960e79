//! Relationship extraction: article text → typed relationships.
//!
//! [`extract`] is a pure function of the article content and a schema
//! snapshot. Malformed typed values never fail the extraction: the
//! relationship is dropped (and reported in [`Extracted::dropped`]) while the
//! raw tag stays in the cosmetic `tags` list.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::schema::SchemaSnapshot;
use crate::slug::slugify;
use crate::tag::{parse_tag, stringify_tag, Tag};
use crate::tag_type::{CoercionError, RelationshipValue};

/// Tag applied when an article is saved without any tags.
pub const SENTINEL_TAG: &str = "tagme";

/// `[[Target]]` or `[[Target|label]]`.
static BRACKET_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]*)?\]\]").expect("valid regex")
});

/// `#name` or `#name:value` / `#name:"quoted value"`. The hash must not
/// follow a word character, `&` (HTML entities) or `/` (URL fragments).
static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w&/#])#([A-Za-z][\w.-]*)(?::("(?:[^"\\]|\\.)*"|[^\s,;()\[\]<>"]+))?"#)
        .expect("valid regex")
});

/// Relationship values are kept per tag name, in first-seen order.
pub type Relationships = BTreeMap<String, Vec<RelationshipValue>>;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// User-supplied article content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleContent {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

impl ArticleContent {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate the shape of loosely-typed input.
    ///
    /// Fails with `MissingTitle`/`MissingBody`/`MissingTags` when a field is
    /// absent or null, and `InvalidTitle` when the title is not a string.
    /// Tags must be an array of strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        let title = match value.get("title") {
            None | Some(serde_json::Value::Null) => return Err(CoreError::MissingTitle),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(CoreError::InvalidTitle(format!(
                    "title must be a string, got {other}"
                )))
            }
        };
        let body = match value.get("body") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => return Err(CoreError::MissingBody),
        };
        let tags = match value.get("tags") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(CoreError::MissingTags)?,
            _ => return Err(CoreError::MissingTags),
        };
        Ok(Self { title, body, tags })
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A typed tag whose value did not coerce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRelationship {
    pub tag: String,
    pub reason: CoercionError,
}

/// The derived structure of one content state.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// Slug of the title.
    pub id: String,
    pub title: String,
    pub body: String,
    /// De-duplicated raw tags (cosmetic form, shown to users).
    pub tags: Vec<String>,
    /// Names of all explicit tags.
    pub base_tags: Vec<String>,
    pub relationships: Relationships,
    pub body_referenced_articles: Vec<String>,
    /// Hashtags found in the body, in canonical tag form.
    pub body_referenced_hashtags: Vec<String>,
    /// `base_tags` ∪ hashtag names.
    pub all_base_tags: Vec<String>,
    pub dropped: Vec<DroppedRelationship>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract relationships from article content under `schema`.
pub fn extract(content: &ArticleContent, schema: &SchemaSnapshot) -> Result<Extracted, CoreError> {
    let id = slugify(&content.title);
    if id.is_empty() {
        return Err(CoreError::InvalidTitle(format!(
            "title {:?} produces an empty id",
            content.title
        )));
    }

    let (tags, parsed) = dedupe_tags(&content.tags);

    let mut relationships = Relationships::new();
    let mut dropped = Vec::new();
    let mut base_tags: IndexSet<String> = IndexSet::new();

    for tag in &parsed {
        base_tags.insert(tag.name.clone());
        promote(tag, schema, &mut relationships, &mut dropped);
    }

    let hashtags = scan_hashtags(&content.body);
    let mut all_base_tags = base_tags.clone();
    let mut body_referenced_hashtags: IndexSet<String> = IndexSet::new();
    for tag in &hashtags {
        all_base_tags.insert(tag.name.clone());
        body_referenced_hashtags.insert(stringify_tag(tag));
        promote(tag, schema, &mut relationships, &mut dropped);
    }

    Ok(Extracted {
        id,
        title: content.title.clone(),
        body: content.body.clone(),
        tags,
        base_tags: base_tags.into_iter().collect(),
        relationships,
        body_referenced_articles: scan_bracket_links(&content.body),
        body_referenced_hashtags: body_referenced_hashtags.into_iter().collect(),
        all_base_tags: all_base_tags.into_iter().collect(),
        dropped,
    })
}

/// De-duplicate raw tags by their parsed form, keeping the first raw
/// spelling. Unparseable tags are discarded; an empty result becomes the
/// sentinel tag.
fn dedupe_tags(raw_tags: &[String]) -> (Vec<String>, Vec<Tag>) {
    let mut seen: IndexSet<Tag> = IndexSet::new();
    let mut kept = Vec::new();
    for raw in raw_tags {
        if let Some(tag) = parse_tag(raw) {
            if seen.insert(tag) {
                kept.push(raw.trim().to_string());
            }
        }
    }

    if kept.is_empty() {
        let sentinel = Tag::bare(SENTINEL_TAG);
        return (vec![SENTINEL_TAG.to_string()], vec![sentinel]);
    }
    (kept, seen.into_iter().collect())
}

fn promote(
    tag: &Tag,
    schema: &SchemaSnapshot,
    relationships: &mut Relationships,
    dropped: &mut Vec<DroppedRelationship>,
) {
    let Some(tag_type) = schema.tag_type(&tag.name) else {
        return;
    };
    match tag_type.coerce(tag.value.as_deref()) {
        Ok(value) => {
            let values = relationships.entry(tag.name.clone()).or_default();
            if !values.contains(&value) {
                values.push(value);
            }
        }
        Err(reason) => dropped.push(DroppedRelationship {
            tag: stringify_tag(tag),
            reason,
        }),
    }
}

/// Article ids referenced by bracket links, in first-seen order.
pub fn scan_bracket_links(body: &str) -> Vec<String> {
    let mut ids: IndexSet<String> = IndexSet::new();
    for caps in BRACKET_LINK_RE.captures_iter(body) {
        let id = slugify(&caps[1]);
        if !id.is_empty() {
            ids.insert(id);
        }
    }
    ids.into_iter().collect()
}

/// Hashtags in the body, parsed with the tag grammar.
pub fn scan_hashtags(body: &str) -> Vec<Tag> {
    let mut tags: IndexSet<Tag> = IndexSet::new();
    for caps in HASHTAG_RE.captures_iter(body) {
        let name = &caps[1];
        let name = name.trim_end_matches(['.', '-']);
        if name.is_empty() {
            continue;
        }
        let raw = match caps.get(2) {
            Some(value) => {
                let value = value.as_str();
                let value = if value.starts_with('"') {
                    value
                } else {
                    value.trim_end_matches(['.', ',', '!', '?', ':'])
                };
                format!("{name}:{value}")
            }
            None => name.to_string(),
        };
        if let Some(tag) = parse_tag(&raw) {
            tags.insert(tag);
        }
    }
    tags.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
