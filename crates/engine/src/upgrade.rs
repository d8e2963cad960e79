//! Structural upgrades of stored article documents.
//!
//! Each upgrade is keyed off the absence of a newer field rather than a
//! format version, so running them over an already upgraded document
//! changes nothing:
//!
//! - flat `{title, body, tags, ...}` documents are wrapped into `reviewed`;
//! - a missing `uuid` is derived from the document id;
//! - a missing `unreviewed` state is synthesized from `reviewed`;
//! - an embedded `history` array is moved out into standalone
//!   [`HistoryEntry`] documents.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;
use wikigraph_core::article::{Article, HistoryEntry};
use wikigraph_core::types::Timestamp;

/// Fields of a content state, as found at the top level of flat documents.
const STATE_FIELDS: &[&str] = &[
    "title",
    "body",
    "tags",
    "baseTags",
    "relationships",
    "bodyReferencedArticles",
    "bodyReferencedHashtags",
    "allBaseTags",
    "updatedBy",
    "updatedTime",
    "createdBy",
    "createdTime",
];

const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("document {0} is not a JSON object")]
    NotAnObject(String),

    #[error("document {0} has no content state")]
    NoContent(String),

    #[error("document {id} embeds {len} history items, more than can be numbered")]
    HistoryTooLong { id: String, len: usize },

    #[error("document {id} is malformed: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An upgraded article plus the history entries split out of it.
#[derive(Debug, Clone)]
pub struct Upgraded {
    pub article: Article,
    pub history: Vec<HistoryEntry>,
    /// Whether any upgrade applied.
    pub changed: bool,
}

/// History item embedded in old article documents.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddedHistory {
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    updated_by: Option<String>,
    #[serde(default)]
    updated_time: Option<Timestamp>,
}

/// Apply every structural upgrade to a stored article body.
pub fn upgrade(id: &str, body: &Value) -> Result<Upgraded, UpgradeError> {
    let mut doc = body
        .as_object()
        .cloned()
        .ok_or_else(|| UpgradeError::NotAnObject(id.to_string()))?;
    let mut changed = false;

    if !has_state(&doc, "reviewed") && !has_state(&doc, "unreviewed") {
        if !doc.contains_key("title") {
            return Err(UpgradeError::NoContent(id.to_string()));
        }
        let mut state = Map::new();
        for field in STATE_FIELDS {
            if let Some(value) = doc.remove(*field) {
                state.insert((*field).to_string(), value);
            }
        }
        doc.insert("reviewed".into(), Value::Object(state));
        changed = true;
    }

    let uuid = match doc
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        Some(uuid) => uuid,
        None => {
            let uuid = legacy_uuid(id);
            doc.insert("uuid".into(), json!(uuid));
            changed = true;
            uuid
        }
    };

    if doc.get("id").and_then(Value::as_str) != Some(id) {
        doc.insert("id".into(), json!(id));
        changed = true;
    }

    for key in ["reviewed", "unreviewed"] {
        if let Some(Value::Object(state)) = doc.get_mut(key) {
            changed |= fill_state_defaults(state);
        }
    }

    if !has_state(&doc, "unreviewed") {
        if let Some(Value::Object(reviewed)) = doc.get("reviewed") {
            let mut unreviewed = reviewed.clone();
            unreviewed.remove("createdBy");
            unreviewed.remove("createdTime");
            doc.insert("unreviewed".into(), Value::Object(unreviewed));
            doc.insert("unreviewedPending".into(), Value::Bool(false));
            changed = true;
        }
    }

    let embedded = match doc.remove("history") {
        Some(Value::Array(items)) => {
            changed = true;
            items
        }
        Some(_) => {
            changed = true;
            Vec::new()
        }
        None => Vec::new(),
    };

    let article: Article =
        serde_json::from_value(Value::Object(doc)).map_err(|source| UpgradeError::Malformed {
            id: id.to_string(),
            source,
        })?;

    if u32::try_from(embedded.len()).is_err() {
        return Err(UpgradeError::HistoryTooLong {
            id: id.to_string(),
            len: embedded.len(),
        });
    }
    let history = embedded
        .into_iter()
        .zip(0u32..)
        .filter_map(|(item, position)| match serde_json::from_value::<EmbeddedHistory>(item) {
            Ok(item) => Some(history_entry(&article, position, item)),
            Err(e) => {
                tracing::warn!(id, position, error = %e, "Skipping unreadable embedded history item");
                None
            }
        })
        .collect();

    Ok(Upgraded {
        article,
        history,
        changed,
    })
}

fn has_state(doc: &Map<String, Value>, key: &str) -> bool {
    doc.get(key).is_some_and(Value::is_object)
}

/// Fill fields required by [`wikigraph_core::article::ContentState`].
fn fill_state_defaults(state: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    let time = state
        .get("createdTime")
        .cloned()
        .unwrap_or_else(|| json!(Timestamp::UNIX_EPOCH));
    let defaults = [
        ("body", json!("")),
        ("tags", json!([])),
        ("updatedBy", json!(UNKNOWN_USER)),
        ("updatedTime", time),
    ];
    for (field, default) in defaults {
        if state.get(field).map_or(true, Value::is_null) {
            state.insert(field.to_string(), default);
            changed = true;
        }
    }
    changed
}

/// Stable uuid for a document stored before articles carried one.
fn legacy_uuid(id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("wikigraph:article/{id}").as_bytes())
}

/// Embedded items get a time-ordered entry id derived from the article uuid
/// and their position, so re-running an interrupted migration rewrites the
/// same entries.
fn history_entry(article: &Article, position: u32, item: EmbeddedHistory) -> HistoryEntry {
    let updated_time = item.updated_time.unwrap_or(Timestamp::UNIX_EPOCH);
    let millis = u64::try_from(updated_time.timestamp_millis()).unwrap_or(0);
    let mut random = [0u8; 10];
    random[..6].copy_from_slice(&article.uuid.as_bytes()[10..]);
    random[6..].copy_from_slice(&position.to_be_bytes());

    HistoryEntry {
        entry_id: uuid::Builder::from_unix_timestamp_millis(millis, &random).into_uuid(),
        uuid: article.uuid,
        article_id: article.id.clone(),
        title: item.title,
        body: item.body,
        tags: item.tags,
        updated_by: item.updated_by.unwrap_or_else(|| UNKNOWN_USER.to_string()),
        updated_time,
        unreviewed_history: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn flat_legacy_document_is_wrapped() {
        let legacy = json!({
            "title": "Western Digital",
            "body": "They make hard drives.",
            "tags": ["actor", "company"],
            "history": [
                { "title": "WD", "body": "Drives.", "tags": ["actor"],
                  "updatedBy": "alice", "updatedTime": "2020-01-01T00:00:00Z" },
                { "title": "Western Digital", "body": "They make hard drives.",
                  "tags": ["actor", "company"], "updatedTime": "2021-01-01T00:00:00Z" }
            ]
        });

        let upgraded = upgrade("western-digital", &legacy).unwrap();
        assert!(upgraded.changed);

        let article = &upgraded.article;
        assert_eq!(article.id, "western-digital");
        let reviewed = article.reviewed.as_ref().unwrap();
        assert_eq!(reviewed.title, "Western Digital");
        assert_eq!(reviewed.updated_by, "unknown");
        let unreviewed = article.unreviewed.as_ref().unwrap();
        assert_eq!(unreviewed.body, reviewed.body);
        assert!(unreviewed.created_by.is_none());
        assert!(!article.unreviewed_pending);

        assert_eq!(upgraded.history.len(), 2);
        assert!(upgraded.history[0].entry_id < upgraded.history[1].entry_id);
        assert_eq!(upgraded.history[0].updated_by, "alice");
        assert_eq!(upgraded.history[1].updated_by, "unknown");
        assert!(upgraded.history.iter().all(|h| h.uuid == article.uuid));
    }

    #[test]
    fn upgrades_are_idempotent() {
        let legacy = json!({ "title": "Mario", "body": "Plumber.", "tags": ["character"] });
        let first = upgrade("mario", &legacy).unwrap();
        let body = serde_json::to_value(&first.article).unwrap();

        let second = upgrade("mario", &body).unwrap();
        assert!(!second.changed);
        assert!(second.history.is_empty());
        assert_eq!(second.article, first.article);
    }

    #[test]
    fn embedded_history_ids_are_stable() {
        let doc = json!({
            "uuid": "0190b5c4-8f1e-7c3a-9d2b-3a4f5e6d7c8b",
            "reviewed": { "title": "Mario", "body": "", "tags": [],
                          "updatedBy": "bob", "updatedTime": "2022-01-01T00:00:00Z" },
            "history": [{ "title": "Mario", "updatedTime": "2021-06-01T00:00:00Z" }]
        });
        let a = upgrade("mario", &doc).unwrap();
        let b = upgrade("mario", &doc).unwrap();
        assert_eq!(a.history[0].entry_id, b.history[0].entry_id);
        assert_eq!(a.article.uuid, b.article.uuid);
    }

    #[test]
    fn flat_documents_with_history_upgrade_identically_on_rerun() {
        let legacy = json!({
            "title": "Mario",
            "body": "A plumber.",
            "tags": ["character"],
            "history": [
                { "title": "Mario", "body": "Plumber.", "updatedTime": "2020-01-01T00:00:00Z" },
                { "title": "Mario", "body": "A plumber.", "updatedTime": "2020-01-01T00:00:00Z" }
            ]
        });
        let first = upgrade("mario", &legacy).unwrap();
        let second = upgrade("mario", &legacy).unwrap();

        assert_eq!(first.article.uuid, second.article.uuid);
        let ids = |u: &Upgraded| u.history.iter().map(|h| h.entry_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_ne!(first.history[0].entry_id, first.history[1].entry_id);

        let other = upgrade("luigi", &legacy).unwrap();
        assert_ne!(other.article.uuid, first.article.uuid);
        assert_ne!(other.history[0].entry_id, first.history[0].entry_id);
    }

    #[test]
    fn entry_ids_keep_positions_past_sixteen_bits() {
        let article = upgrade("mario", &json!({ "title": "Mario" })).unwrap().article;
        let item = || EmbeddedHistory {
            title: "Mario".into(),
            body: String::new(),
            tags: Vec::new(),
            updated_by: None,
            updated_time: None,
        };
        let low = history_entry(&article, 1, item());
        let high = history_entry(&article, 65_537, item());
        assert_ne!(low.entry_id, high.entry_id);
    }

    #[test]
    fn unusable_documents_are_rejected() {
        assert_matches!(upgrade("x", &json!([1, 2])), Err(UpgradeError::NotAnObject(_)));
        assert_matches!(upgrade("x", &json!({ "body": "no title" })), Err(UpgradeError::NoContent(_)));
    }
}
