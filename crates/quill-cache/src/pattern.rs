//! Structured key-segment matching
//!
//! Patterns are split on `:` like keys. Within a segment `*` matches any
//! run of characters and `?` matches exactly one; neither crosses a `:`.
//! A final segment that is exactly `*` matches one or more trailing key
//! segments, so `file:abc:*` covers `file:abc:nodes:1:2`.

use glob::Pattern;

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Glob(Pattern),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if !raw.contains(['*', '?']) {
            return Self::Literal(raw.to_string());
        }
        match Pattern::new(&escape_segment(raw)) {
            Ok(pattern) => Self::Glob(pattern),
            Err(_) => Self::Literal(raw.to_string()),
        }
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Literal(lit) => lit == segment,
            Self::Glob(pattern) => pattern.matches(segment),
        }
    }
}

/// Keep `*` and `?` as wildcards; everything else (including `[` and `]`)
/// matches literally
fn escape_segment(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    let mut literal = String::new();
    for c in raw.chars() {
        if c == '*' || c == '?' {
            escaped.push_str(&Pattern::escape(&literal));
            literal.clear();
            escaped.push(c);
        } else {
            literal.push(c);
        }
    }
    escaped.push_str(&Pattern::escape(&literal));
    escaped
}

/// A compiled invalidation pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_wildcard: bool,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Self {
        let mut parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let trailing_wildcard = parts.len() > 1 && parts.last() == Some(&"*");
        if trailing_wildcard {
            parts.pop();
        }
        Self {
            raw: pattern.to_string(),
            segments: parts.into_iter().map(Segment::parse).collect(),
            trailing_wildcard,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, key: &str) -> bool {
        let parts: Vec<&str> = key.split(SEPARATOR).collect();

        let fixed = self.segments.len();
        let length_ok = if self.trailing_wildcard {
            parts.len() > fixed
        } else {
            parts.len() == fixed
        };
        if !length_ok {
            return false;
        }

        self.segments
            .iter()
            .zip(parts.iter())
            .all(|(segment, part)| segment.matches(part))
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        let p = KeyPattern::new("file:abc");
        assert!(p.matches("file:abc"));
        assert!(!p.matches("file:abcd"));
        assert!(!p.matches("file:abc:nodes"));
    }

    #[test]
    fn test_trailing_wildcard_spans_segments() {
        let p = KeyPattern::new("file:abc:*");
        assert!(p.matches("file:abc:comments"));
        assert!(p.matches("file:abc:nodes:1:2"));
        assert!(!p.matches("file:abc"));
        assert!(!p.matches("file:abd:comments"));
    }

    #[test]
    fn test_in_segment_glob_stays_in_segment() {
        let p = KeyPattern::new("file:ab*");
        assert!(p.matches("file:abc"));
        assert!(p.matches("file:ab"));
        assert!(!p.matches("file:abc:nodes"));

        let p = KeyPattern::new("file:*:comments");
        assert!(p.matches("file:abc:comments"));
        assert!(!p.matches("file:abc:nodes"));
    }

    #[test]
    fn test_question_mark() {
        let p = KeyPattern::new("file:a?c");
        assert!(p.matches("file:abc"));
        assert!(!p.matches("file:ac"));
        assert!(!p.matches("file:abbc"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = KeyPattern::new("file:a.c+(1)");
        assert!(p.matches("file:a.c+(1)"));
        assert!(!p.matches("file:abc+(1)"));
    }

    #[test]
    fn test_lone_star_matches_single_segment_keys() {
        let p = KeyPattern::new("*");
        assert!(p.matches("anything"));
        assert!(!p.matches("file:abc"));
    }

    #[test]
    fn test_glob_backtracking() {
        assert!(KeyPattern::new("*b*d").matches("abcbxd"));
        assert!(!KeyPattern::new("a*z").matches("abc"));
    }

    #[test]
    fn test_brackets_are_literal() {
        let p = KeyPattern::new("file:[ab]*");
        assert!(p.matches("file:[ab]-1"));
        assert!(!p.matches("file:a-1"));
        assert_eq!(escape_segment("[x]?*"), "[[]x[]]?*");
    }
}
