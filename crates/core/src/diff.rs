//! Line-level diff between two history entries.

use serde::Serialize;

use crate::article::HistoryEntry;

/// How a line differs between the older and newer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    Added,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub op: DiffOp,
    pub text: String,
}

/// Differences between two committed versions of an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDiff {
    /// `Some((old, new))` when the title changed.
    pub title: Option<(String, String)>,
    pub tags_added: Vec<String>,
    pub tags_removed: Vec<String>,
    pub body: Vec<DiffLine>,
}

impl EntryDiff {
    pub fn between(older: &HistoryEntry, newer: &HistoryEntry) -> Self {
        let title = (older.title != newer.title)
            .then(|| (older.title.clone(), newer.title.clone()));
        let tags_added = newer
            .tags
            .iter()
            .filter(|t| !older.tags.contains(t))
            .cloned()
            .collect();
        let tags_removed = older
            .tags
            .iter()
            .filter(|t| !newer.tags.contains(t))
            .cloned()
            .collect();
        Self {
            title,
            tags_added,
            tags_removed,
            body: line_diff(&older.body, &newer.body),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tags_added.is_empty()
            && self.tags_removed.is_empty()
            && self.body.iter().all(|l| l.op == DiffOp::Unchanged)
    }
}

/// LCS line diff. Output is in document order.
pub fn line_diff(old: &str, new: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();
    let (m, n) = (a.len(), b.len());

    let mut lcs = vec![vec![0u32; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            lcs[i][j] = if a[i - 1] == b[j - 1] {
                lcs[i - 1][j - 1] + 1
            } else {
                lcs[i - 1][j].max(lcs[i][j - 1])
            };
        }
    }

    let line = |op, text: &str| DiffLine {
        op,
        text: text.to_string(),
    };

    let mut out = Vec::with_capacity(m.max(n));
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && a[i - 1] == b[j - 1] {
            out.push(line(DiffOp::Unchanged, a[i - 1]));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || lcs[i][j - 1] >= lcs[i - 1][j]) {
            out.push(line(DiffOp::Added, b[j - 1]));
            j -= 1;
        } else {
            out.push(line(DiffOp::Removed, a[i - 1]));
            i -= 1;
        }
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn entry(title: &str, body: &str, tags: &[&str]) -> HistoryEntry {
        HistoryEntry {
            entry_id: Uuid::now_v7(),
            uuid: Uuid::nil(),
            article_id: "a".into(),
            title: title.into(),
            body: body.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            updated_by: "u".into(),
            updated_time: Utc::now(),
            unreviewed_history: vec![],
        }
    }

    #[test]
    fn identical_texts() {
        let diff = line_diff("one\ntwo", "one\ntwo");
        assert_eq!(diff.len(), 2);
        assert!(diff.iter().all(|d| d.op == DiffOp::Unchanged));
    }

    #[test]
    fn added_and_removed_lines() {
        let diff = line_diff("one\ntwo\nthree", "one\nthree\nfour");
        let ops: Vec<_> = diff.iter().map(|d| (d.op, d.text.as_str())).collect();
        assert_eq!(
            ops,
            vec![
                (DiffOp::Unchanged, "one"),
                (DiffOp::Removed, "two"),
                (DiffOp::Unchanged, "three"),
                (DiffOp::Added, "four"),
            ]
        );
    }

    #[test]
    fn empty_old_text() {
        let diff = line_diff("", "x");
        assert_eq!(diff, vec![DiffLine { op: DiffOp::Added, text: "x".into() }]);
    }

    #[test]
    fn entry_diff_reports_title_and_tags() {
        let old = entry("Mario", "plumber", &["actor"]);
        let new = entry("Super Mario", "plumber", &["actor", "hero"]);
        let diff = EntryDiff::between(&old, &new);
        assert_eq!(diff.title, Some(("Mario".into(), "Super Mario".into())));
        assert_eq!(diff.tags_added, vec!["hero".to_string()]);
        assert!(diff.tags_removed.is_empty());
        assert!(!diff.is_empty());
    }

    #[test]
    fn same_entry_has_empty_diff() {
        let e = entry("A", "b\nc", &["x"]);
        assert!(EntryDiff::between(&e, &e).is_empty());
    }
}
