//! Tag-type schema: the discovered mapping of tag name → declared type.
//!
//! The schema is self-describing. An article whose reviewed tags include
//! `tag-type:<type>` declares that the tag named by the article's own id has
//! that type; the base tag `unique-tag` on the same article additionally
//! marks the tag as unique.
//!
//! Snapshots are immutable. A new snapshot is only ever produced by
//! [`SchemaSnapshot::reduce`] from a full scan, never patched in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tag::parse_tag;
use crate::tag_type::TagType;

// ---------------------------------------------------------------------------
// System tags
// ---------------------------------------------------------------------------

/// The self-describing declaration tag.
pub const TAG_TYPE_TAG: &str = "tag-type";

/// Article-typed tag linking an article to the articles it implies.
pub const IMPLIES_TAG: &str = "implies";

/// String-typed tag giving an article an alternative name.
pub const ALIAS_TAG: &str = "alias";

/// Base tag on a declaration article marking the declared tag as unique.
pub const UNIQUE_TAG_MARKER: &str = "unique-tag";

/// System tag types. These always win over user declarations so the
/// declaration tags themselves stay parseable.
pub const SYSTEM_TAG_TYPES: &[(&str, TagType)] = &[
    (TAG_TYPE_TAG, TagType::String),
    (IMPLIES_TAG, TagType::Article),
    (ALIAS_TAG, TagType::String),
];

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// How a single tag name is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDefinition {
    pub tag_type: TagType,
    #[serde(default)]
    pub unique: bool,
}

impl TagDefinition {
    pub fn new(tag_type: TagType) -> Self {
        Self {
            tag_type,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Scan result
// ---------------------------------------------------------------------------

/// Declarations collected by one full scan of the article collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaScan {
    declarations: BTreeMap<String, TagDefinition>,
    skipped: Vec<String>,
}

impl SchemaScan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the declaration (if any) carried by one article's reviewed tags.
    ///
    /// Returns `true` when the article declared a type. Unknown type names
    /// are remembered in [`skipped`](Self::skipped) and otherwise ignored.
    pub fn add_article<S: AsRef<str>>(&mut self, article_id: &str, tags: &[S]) -> bool {
        let mut declared: Option<TagType> = None;
        let mut unique = false;

        for raw in tags {
            let Some(tag) = parse_tag(raw.as_ref()) else {
                continue;
            };
            if tag.name == UNIQUE_TAG_MARKER {
                unique = true;
            } else if tag.name == TAG_TYPE_TAG && declared.is_none() {
                match tag.value.as_deref().and_then(TagType::parse) {
                    Some(t) => declared = Some(t),
                    None => self.skipped.push(article_id.to_string()),
                }
            }
        }

        match declared {
            Some(tag_type) => {
                self.declarations.insert(
                    article_id.to_string(),
                    TagDefinition { tag_type, unique },
                );
                true
            }
            None => false,
        }
    }

    pub fn declarations(&self) -> &BTreeMap<String, TagDefinition> {
        &self.declarations
    }

    /// Declaration articles whose `tag-type` value named no known type.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable, generation-stamped schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    generation: u64,
    definitions: BTreeMap<String, TagDefinition>,
}

impl SchemaSnapshot {
    /// The generation-0 schema containing only the system tag types.
    pub fn bootstrap() -> Self {
        Self {
            generation: 0,
            definitions: Self::candidate(&SchemaScan::new()),
        }
    }

    /// Build a snapshot directly from a scan (used by tests and tooling).
    pub fn from_scan(generation: u64, scan: &SchemaScan) -> Self {
        Self {
            generation,
            definitions: Self::candidate(scan),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn definitions(&self) -> &BTreeMap<String, TagDefinition> {
        &self.definitions
    }

    pub fn definition(&self, tag_name: &str) -> Option<&TagDefinition> {
        self.definitions.get(tag_name)
    }

    pub fn tag_type(&self, tag_name: &str) -> Option<TagType> {
        self.definitions.get(tag_name).map(|d| d.tag_type)
    }

    pub fn is_unique(&self, tag_name: &str) -> bool {
        self.definitions.get(tag_name).is_some_and(|d| d.unique)
    }

    /// Names of all tags declared unique.
    pub fn unique_tags(&self) -> impl Iterator<Item = &str> {
        self.definitions
            .iter()
            .filter(|(_, d)| d.unique)
            .map(|(name, _)| name.as_str())
    }

    /// Scan declarations with the system tag types forced on top.
    fn candidate(scan: &SchemaScan) -> BTreeMap<String, TagDefinition> {
        let mut definitions = scan.declarations.clone();
        for (name, tag_type) in SYSTEM_TAG_TYPES {
            definitions.insert((*name).to_string(), TagDefinition::new(*tag_type));
        }
        definitions
    }

    /// Reduce a full scan against this snapshot.
    ///
    /// The comparison is two-way, so additions, removals and type changes
    /// are all detected. Unchanged scans keep the current generation.
    pub fn reduce(&self, scan: &SchemaScan) -> SchemaTransition {
        let candidate = Self::candidate(scan);
        let diff = SchemaDiff::between(&self.definitions, &candidate);
        if diff.is_empty() {
            SchemaTransition::Unchanged
        } else {
            SchemaTransition::Changed {
                snapshot: SchemaSnapshot {
                    generation: self.generation + 1,
                    definitions: candidate,
                },
                diff,
            }
        }
    }
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self::bootstrap()
    }
}

/// Outcome of [`SchemaSnapshot::reduce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaTransition {
    Unchanged,
    Changed {
        snapshot: SchemaSnapshot,
        diff: SchemaDiff,
    },
}

/// Tag names that differ between two schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SchemaDiff {
    pub fn between(
        old: &BTreeMap<String, TagDefinition>,
        new: &BTreeMap<String, TagDefinition>,
    ) -> Self {
        let mut diff = SchemaDiff::default();
        for (name, def) in new {
            match old.get(name) {
                None => diff.added.push(name.clone()),
                Some(prev) if prev != def => diff.changed.push(name.clone()),
                Some(_) => {}
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
