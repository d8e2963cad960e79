//! Tag grammar: `name` or `name:value`.
//!
//! The name ends at the first unescaped colon (`\:` escapes a colon inside a
//! name, `\\` a backslash). The value is everything after that colon,
//! trimmed, unless it starts with a double quote: quoted values keep their
//! interior whitespace and colons, and support `\"` / `\\` escapes.
//!
//! Names are case-insensitive and normalized to lowercase.

use std::fmt;

/// A parsed tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub name: String,
    pub value: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into().trim().to_lowercase(),
            value,
        }
    }

    /// A name-only tag.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// A `name:value` tag.
    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Some(value.into()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stringify_tag(self))
    }
}

/// Parse a raw tag string.
///
/// Returns `None` when the name part is empty (e.g. `":foo"` or `"   "`).
pub fn parse_tag(raw: &str) -> Option<Tag> {
    let raw = raw.trim();
    let mut name = String::with_capacity(raw.len());
    let mut rest: Option<&str> = None;

    let mut chars = raw.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    name.push(escaped);
                }
            }
            ':' => {
                rest = Some(&raw[i + 1..]);
                break;
            }
            _ => name.push(c),
        }
    }

    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }

    let value = rest.and_then(parse_value);
    Some(Tag { name, value })
}

fn parse_value(rest: &str) -> Option<String> {
    let trimmed = rest.trim();
    if let Some(quoted) = trimmed.strip_prefix('"') {
        if let Some(value) = unquote(quoted) {
            return Some(value);
        }
    }
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read a quoted string body (opening quote already consumed). Returns
/// `None` if the closing quote is missing.
fn unquote(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return Some(out),
            _ => out.push(c),
        }
    }
    None
}

/// Render a tag so that [`parse_tag`] reads it back unchanged.
pub fn stringify_tag(tag: &Tag) -> String {
    let mut out = String::with_capacity(tag.name.len() + 8);
    for c in tag.name.chars() {
        if c == ':' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }

    if let Some(value) = &tag.value {
        out.push(':');
        if needs_quotes(value) {
            out.push('"');
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || value.starts_with('"') || value.contains(char::is_whitespace)
}
