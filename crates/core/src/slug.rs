//! Article id generation.
//!
//! Every article id, and every `article`-typed relationship value, is the
//! slug of a title. The function is idempotent, so ids can be re-slugged
//! freely (e.g. when a relationship value is already an id).

/// Punctuation that survives slugging unchanged. Dots keep host names and
/// IP addresses readable as article ids (`mail.example.com`).
pub const SLUG_PASSTHROUGH: &[char] = &['.'];

/// Generate an article id from a title.
///
/// Converts to lowercase, replaces every character outside `a-z`, `0-9` and
/// [`SLUG_PASSTHROUGH`] with a hyphen, collapses consecutive hyphens, and
/// trims leading/trailing hyphens and dots.
pub fn slugify(title: &str) -> String {
    let mut result = String::with_capacity(title.len());
    let mut prev_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || SLUG_PASSTHROUGH.contains(&c) {
            result.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen {
            result.push('-');
            prev_hyphen = true;
        }
    }

    result
        .trim_matches(|c: char| c == '-' || SLUG_PASSTHROUGH.contains(&c))
        .to_string()
}

/// Whether `candidate` is already in slug form.
pub fn is_slug(candidate: &str) -> bool {
    !candidate.is_empty() && slugify(candidate) == candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_basic_title() {
        assert_eq!(slugify("Western Digital"), "western-digital");
    }

    #[test]
    fn slug_special_characters() {
        assert_eq!(slugify("How to: Use Workflows (v2)"), "how-to-use-workflows-v2");
    }

    #[test]
    fn slug_collapses_consecutive_hyphens() {
        assert_eq!(slugify("foo---bar"), "foo-bar");
        assert_eq!(slugify("foo  & bar"), "foo-bar");
    }

    #[test]
    fn slug_trims_leading_trailing_hyphens() {
        assert_eq!(slugify("--hello--"), "hello");
        assert_eq!(slugify("...hello."), "hello");
    }

    #[test]
    fn slug_keeps_dots_inside() {
        assert_eq!(slugify("Mail.Example.com"), "mail.example.com");
        assert_eq!(slugify("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn slug_non_ascii_becomes_hyphen() {
        assert_eq!(slugify("Café Olé"), "caf-ol");
    }

    #[test]
    fn slug_empty_for_punctuation_only() {
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn slug_is_idempotent() {
        for title in [
            "Super Mario",
            "  padded  ",
            "a.b--c",
            "WEIRD__case__Title!!",
            "x...y",
            "ünïcode title",
        ] {
            let once = slugify(title);
            assert_eq!(slugify(&once), once, "not idempotent for {title:?}");
        }
    }

    #[test]
    fn slug_alphabet() {
        let slug = slugify("Hello, World! (2024) #1 ~ path/to.file");
        assert!(slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'));
    }

    #[test]
    fn is_slug_checks() {
        assert!(is_slug("super-mario"));
        assert!(!is_slug("Super Mario"));
        assert!(!is_slug(""));
    }
}
