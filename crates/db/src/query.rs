//! Store-neutral query model.
//!
//! Fields are dotted paths into the document JSON (`reviewed.allBaseTags`).
//! Arrays are flattened at every step, so a term query on an array field
//! matches when any element equals the value.

use std::cmp::Ordering;

use serde_json::Value;

/// A boolean/term/range/match query over document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every document.
    All,
    /// Some leaf value equals `value`.
    Term { field: String, value: Value },
    /// Some leaf value equals one of `values`.
    Terms { field: String, values: Vec<Value> },
    /// Some leaf value lies within the (inclusive) bounds.
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    /// Every whitespace-separated word of `text` occurs, case-insensitively,
    /// in some string leaf.
    Match { field: String, text: String },
    /// The field is present and not null.
    Exists { field: String },
    /// `must` all match, `must_not` none match, and when `should` is
    /// non-empty at least one of its clauses matches.
    Bool {
        must: Vec<Query>,
        should: Vec<Query>,
        must_not: Vec<Query>,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::Terms {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }

    pub fn matches_text(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<Value>, lte: Option<Value>) -> Self {
        Self::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    pub fn must(clauses: impl IntoIterator<Item = Query>) -> Self {
        Self::Bool {
            must: clauses.into_iter().collect(),
            should: Vec::new(),
            must_not: Vec::new(),
        }
    }

    pub fn should(clauses: impl IntoIterator<Item = Query>) -> Self {
        Self::Bool {
            must: Vec::new(),
            should: clauses.into_iter().collect(),
            must_not: Vec::new(),
        }
    }

    pub fn not(clause: Query) -> Self {
        Self::Bool {
            must: Vec::new(),
            should: Vec::new(),
            must_not: vec![clause],
        }
    }

    /// Evaluate the query against a document body.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Term { field, value } => leaves(doc, field).any(|v| v == value),
            Self::Terms { field, values } => leaves(doc, field).any(|v| values.contains(v)),
            Self::Range { field, gte, lte } => leaves(doc, field).any(|v| {
                gte.as_ref()
                    .map_or(true, |lo| compare(v, lo).is_some_and(Ordering::is_ge))
                    && lte
                        .as_ref()
                        .map_or(true, |hi| compare(v, hi).is_some_and(Ordering::is_le))
            }),
            Self::Match { field, text } => {
                let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
                if words.is_empty() {
                    return false;
                }
                leaves(doc, field).any(|v| {
                    v.as_str().is_some_and(|s| {
                        let s = s.to_lowercase();
                        words.iter().all(|w| s.contains(w.as_str()))
                    })
                })
            }
            Self::Exists { field } => leaves(doc, field).any(|v| !v.is_null()),
            Self::Bool {
                must,
                should,
                must_not,
            } => {
                must.iter().all(|q| q.matches(doc))
                    && !must_not.iter().any(|q| q.matches(doc))
                    && (should.is_empty() || should.iter().any(|q| q.matches(doc)))
            }
        }
    }
}

/// Split a dotted field path into its segments.
pub fn field_segments(field: &str) -> Vec<&str> {
    field.split('.').filter(|s| !s.is_empty()).collect()
}

/// All leaf values reached by `field`, flattening arrays.
pub fn leaves<'a>(doc: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> {
    let mut current: Vec<&'a Value> = vec![doc];
    for segment in field_segments(field) {
        current = current
            .into_iter()
            .flat_map(flatten)
            .filter_map(|v| v.get(segment))
            .collect();
    }
    current.into_iter().flat_map(flatten).collect::<Vec<_>>().into_iter()
}

fn flatten(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        other => vec![other],
    }
}

/// Order two scalar JSON values of the same kind. Mixed kinds don't compare.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort order for search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A paged search. Without a sort, hits are ordered by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub sort: Option<Sort>,
    pub from: usize,
    pub size: usize,
}

impl SearchRequest {
    pub fn new(query: Query, size: usize) -> Self {
        Self {
            query,
            sort: None,
            from: 0,
            size,
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn offset(mut self, from: usize) -> Self {
        self.from = from;
        self
    }
}

/// One bucket of a terms aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermBucket {
    pub key: String,
    pub doc_count: u64,
}

/// Bucket key for a leaf value: strings verbatim, other scalars as JSON.
pub fn bucket_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null | Value::Object(_) | Value::Array(_) => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc() -> Value {
        json!({
            "id": "web-01",
            "reviewed": {
                "title": "Web Server 01",
                "allBaseTags": ["server", "ip"],
                "relationships": { "ip": ["10.0.0.1", "10.0.0.2"], "port": [443] }
            },
            "history": [{ "title": "Old" }, { "title": "Older" }],
            "gone": null
        })
    }

    #[test]
    fn term_matches_array_elements() {
        assert!(Query::term("reviewed.allBaseTags", "server").matches(&doc()));
        assert!(Query::term("reviewed.relationships.ip", "10.0.0.2").matches(&doc()));
        assert!(!Query::term("reviewed.allBaseTags", "client").matches(&doc()));
    }

    #[test]
    fn paths_traverse_arrays_of_objects() {
        assert!(Query::term("history.title", "Older").matches(&doc()));
    }

    #[test]
    fn terms_and_range() {
        assert!(Query::terms("id", [json!("x"), json!("web-01")]).matches(&doc()));
        assert!(Query::range("reviewed.relationships.port", Some(json!(400)), None).matches(&doc()));
        assert!(!Query::range("reviewed.relationships.port", None, Some(json!(80))).matches(&doc()));
        assert!(Query::range("id", Some(json!("web")), Some(json!("wez"))).matches(&doc()));
    }

    #[test]
    fn match_is_case_insensitive_and_needs_all_words() {
        assert!(Query::matches_text("reviewed.title", "server web").matches(&doc()));
        assert!(!Query::matches_text("reviewed.title", "server mail").matches(&doc()));
        assert!(!Query::matches_text("reviewed.title", "  ").matches(&doc()));
    }

    #[test]
    fn exists_ignores_null() {
        assert!(Query::exists("reviewed").matches(&doc()));
        assert!(!Query::exists("gone").matches(&doc()));
        assert!(!Query::exists("unreviewed").matches(&doc()));
    }

    #[test]
    fn bool_combinations() {
        let q = Query::Bool {
            must: vec![Query::term("reviewed.allBaseTags", "server")],
            should: vec![Query::term("id", "nope"), Query::term("id", "web-01")],
            must_not: vec![Query::exists("unreviewed")],
        };
        assert!(q.matches(&doc()));
        assert!(!Query::not(Query::All).matches(&doc()));
        assert!(!Query::should([Query::term("id", "nope")]).matches(&doc()));
    }

    #[test]
    fn bucket_keys() {
        assert_eq!(bucket_key(&json!("a")).as_deref(), Some("a"));
        assert_eq!(bucket_key(&json!(3)).as_deref(), Some("3"));
        assert_eq!(bucket_key(&json!(null)), None);
    }
}
