//! The derived graph index snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use wikigraph_core::article::Article;
use wikigraph_core::directory::{normalize_mac, DIRECTORY_ID_TAG, ENDPOINT_ID_TAG};
use wikigraph_core::schema::{SchemaSnapshot, ALIAS_TAG};
use wikigraph_core::slug::slugify;
use wikigraph_core::tag::parse_tag;
use wikigraph_core::tag_type::TagType;
use wikigraph_core::types::Timestamp;

use super::directory::DirectoryGraph;
use super::interner::Interner;

/// Tags carrying external identifiers that link an article to an entity.
pub const IDENTITY_TAGS: &[&str] = &[
    DIRECTORY_ID_TAG,
    ENDPOINT_ID_TAG,
    "sid",
    "mac",
    "sam-account-name",
    "fqdn",
];

/// Normalized form of an identifier value, as used for index keys.
pub fn normalize_identity(tag: &str, value: &str) -> String {
    let value = value.trim();
    match tag {
        "mac" => normalize_mac(value).unwrap_or_else(|| value.to_lowercase()),
        _ => value.to_lowercase(),
    }
}

/// The slice of an article kept in the index.
#[derive(Debug, Clone)]
pub struct IndexedArticle {
    pub id: Arc<str>,
    pub title: Arc<str>,
    pub reviewed: bool,
}

/// Immutable cross-reference maps built from one full scan.
#[derive(Debug, Default)]
pub struct GraphIndex {
    generation: u64,
    built_at: Option<Timestamp>,
    articles: HashMap<Arc<str>, IndexedArticle>,
    /// tag name -> normalized value -> owning articles
    by_identity: HashMap<Arc<str>, HashMap<Arc<str>, Vec<Arc<str>>>>,
    /// article -> tag name -> normalized values
    identities: HashMap<Arc<str>, BTreeMap<Arc<str>, Vec<Arc<str>>>>,
    by_base_tag: HashMap<Arc<str>, Vec<Arc<str>>>,
    aliases: HashMap<Arc<str>, Arc<str>>,
    /// article -> articles referencing it through article-typed tags
    referenced_by: HashMap<Arc<str>, Vec<Arc<str>>>,
    directory: DirectoryGraph,
}

impl GraphIndex {
    /// The placeholder published before the first build.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> Option<Timestamp> {
        self.built_at
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    pub fn article(&self, id: &str) -> Option<&IndexedArticle> {
        self.articles.get(id)
    }

    /// Articles tagged `tag:value` for an identity tag.
    pub fn articles_for_identity(&self, tag: &str, value: &str) -> &[Arc<str>] {
        self.by_identity
            .get(tag)
            .and_then(|values| values.get(normalize_identity(tag, value).as_str()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Distinct values an article carries for an identity tag.
    pub fn identity_values(&self, article_id: &str, tag: &str) -> &[Arc<str>] {
        self.identities
            .get(article_id)
            .and_then(|tags| tags.get(tag))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Articles whose `allBaseTags` contain `tag`.
    pub fn articles_with_tag(&self, tag: &str) -> &[Arc<str>] {
        self.by_base_tag
            .get(tag)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The article an `alias:` tag points at.
    pub fn resolve_alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(slugify(alias).as_str()).map(|id| &**id)
    }

    pub fn referenced_by(&self, article_id: &str) -> &[Arc<str>] {
        self.referenced_by
            .get(article_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn directory(&self) -> &DirectoryGraph {
        &self.directory
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Accumulates one build. Nothing is visible to readers until
/// [`finish`](Self::finish) hands over the completed index.
pub struct GraphIndexParts<'s> {
    interner: Interner,
    schema: &'s SchemaSnapshot,
    index: GraphIndex,
}

impl<'s> GraphIndexParts<'s> {
    pub fn new(schema: &'s SchemaSnapshot) -> Self {
        Self {
            interner: Interner::new(),
            schema,
            index: GraphIndex::default(),
        }
    }

    /// Index the current state of one article.
    pub fn add_article(&mut self, article: &Article) {
        let Some(state) = article.current() else {
            return;
        };
        let id = self.interner.intern(&article.id);
        let index = &mut self.index;

        index.articles.insert(
            Arc::clone(&id),
            IndexedArticle {
                id: Arc::clone(&id),
                title: self.interner.intern(&state.title),
                reviewed: article.is_reviewed(),
            },
        );

        for tag in &state.all_base_tags {
            push_unique(
                index.by_base_tag.entry(self.interner.intern(tag)).or_default(),
                &id,
            );
        }

        let raw_tags = state.tags.iter().chain(&state.body_referenced_hashtags);
        for tag in raw_tags.filter_map(|raw| parse_tag(raw)) {
            let Some(value) = tag.value.as_deref() else {
                continue;
            };
            if tag.name == ALIAS_TAG {
                let alias = slugify(value);
                if !alias.is_empty() && alias != *id {
                    let alias = self.interner.intern(&alias);
                    if let Some(previous) = index.aliases.insert(alias, Arc::clone(&id)) {
                        if previous != id {
                            tracing::warn!(alias = value, first = %previous, second = %id, "Alias claimed by two articles");
                        }
                    }
                }
            } else if IDENTITY_TAGS.contains(&tag.name.as_str()) {
                let name = self.interner.intern(&tag.name);
                let value = self.interner.intern(&normalize_identity(&tag.name, value));
                push_unique(
                    index
                        .by_identity
                        .entry(Arc::clone(&name))
                        .or_default()
                        .entry(Arc::clone(&value))
                        .or_default(),
                    &id,
                );
                push_unique(
                    index
                        .identities
                        .entry(Arc::clone(&id))
                        .or_default()
                        .entry(name)
                        .or_default(),
                    &value,
                );
            }
        }

        for (tag, values) in &state.relationships {
            if self.schema.tag_type(tag) != Some(TagType::Article) {
                continue;
            }
            for target in values.iter().filter_map(|v| v.as_text()) {
                if target == &*id {
                    continue;
                }
                push_unique(
                    index
                        .referenced_by
                        .entry(self.interner.intern(target))
                        .or_default(),
                    &id,
                );
            }
        }
    }

    pub fn set_directory(&mut self, objects: &[wikigraph_core::directory::DirectoryObject]) {
        self.index.directory = DirectoryGraph::build(objects, &mut self.interner);
    }

    pub fn finish(mut self, generation: u64) -> GraphIndex {
        self.index.generation = generation;
        self.index.built_at = Some(Utc::now());
        tracing::debug!(
            generation,
            articles = self.index.articles.len(),
            interned = self.interner.len(),
            "Graph index assembled"
        );
        self.index
    }
}

fn push_unique(list: &mut Vec<Arc<str>>, value: &Arc<str>) {
    if !list.iter().any(|v| v == value) {
        list.push(Arc::clone(value));
    }
}

#[cfg(test)]
mod tests {
    use wikigraph_core::article::ContentState;
    use wikigraph_core::extract::{extract, ArticleContent};
    use wikigraph_core::schema::SchemaScan;
    use uuid::Uuid;

    use super::*;

    fn schema() -> SchemaSnapshot {
        let mut scan = SchemaScan::new();
        scan.add_article("runs-on", &["tag-type:article"]);
        SchemaSnapshot::from_scan(1, &scan)
    }

    fn article(schema: &SchemaSnapshot, title: &str, body: &str, tags: &[&str]) -> Article {
        let extracted = extract(&ArticleContent::new(title, body, tags.iter().copied()), schema).unwrap();
        let state = ContentState::from_extracted(extracted.clone(), "alice", Utc::now());
        Article {
            id: extracted.id,
            uuid: Uuid::new_v4(),
            reviewed: Some(state.clone()),
            unreviewed: Some(state),
            unreviewed_pending: false,
            unreviewed_history: Vec::new(),
        }
    }

    #[test]
    fn identities_tags_aliases_and_references() {
        let schema = schema();
        let mut parts = GraphIndexParts::new(&schema);
        parts.add_article(&article(
            &schema,
            "Web Server",
            "Serves #fqdn:WEB01.corp.local",
            &["server", "mac:00-1A-2B-3C-4D-5E", "alias:www", "runs-on:Host A"],
        ));
        parts.add_article(&article(
            &schema,
            "Host A",
            "Hardware.",
            &["server", "ad-guid:abc", "ad-guid:def"],
        ));
        let index = parts.finish(3);

        assert_eq!(index.generation(), 3);
        assert_eq!(index.article_count(), 2);
        assert_eq!(
            index.articles_for_identity("mac", "00:1a:2b:3c:4d:5e"),
            &[Arc::<str>::from("web-server")]
        );
        assert_eq!(
            index.articles_for_identity("fqdn", "web01.CORP.local").len(),
            1
        );
        assert_eq!(index.articles_with_tag("server").len(), 2);
        assert_eq!(index.articles_with_tag("fqdn").len(), 1);
        assert_eq!(index.resolve_alias("WWW"), Some("web-server"));
        assert_eq!(index.referenced_by("host-a"), &[Arc::<str>::from("web-server")]);
        assert_eq!(index.identity_values("host-a", "ad-guid").len(), 2);
    }

    #[test]
    fn empty_index_answers_nothing() {
        let index = GraphIndex::empty();
        assert_eq!(index.generation(), 0);
        assert!(index.articles_for_identity("ad-guid", "x").is_empty());
        assert!(index.resolve_alias("x").is_none());
        assert!(index.directory().is_empty());
    }
}
