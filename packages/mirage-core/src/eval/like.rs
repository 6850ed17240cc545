//! `LIKE` / `ILIKE` pattern matching.

use regex::Regex;

use crate::error::{DbError, Result};

/// Compiled `LIKE` pattern.
#[derive(Debug, Clone)]
pub struct LikeMatcher {
    regex: Regex,
}

impl LikeMatcher {
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self> {
        let mut source = String::with_capacity(pattern.len() + 8);
        if case_insensitive {
            source.push_str("(?is)");
        } else {
            source.push_str("(?s)");
        }
        source.push('^');
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                '\\' => match chars.next() {
                    Some(escaped) => source.push_str(&regex::escape(&escaped.to_string())),
                    None => {
                        return Err(DbError::Query(
                            "LIKE pattern must not end with escape character".into(),
                        ))
                    }
                },
                c => source.push_str(&regex::escape(&c.to_string())),
            }
        }
        source.push('$');
        let regex = Regex::new(&source)
            .map_err(|e| DbError::Query(format!("invalid LIKE pattern: {}", e)))?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Literal prefix of a `LIKE` pattern usable for a range scan.
///
/// Returns the prefix and whether the pattern is exactly `prefix%`. Patterns
/// starting with a wildcard have no usable prefix.
pub fn literal_prefix(pattern: &str) -> Option<(String, bool)> {
    let mut prefix = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' | '_' => {
                if prefix.is_empty() {
                    return None;
                }
                let bare = c == '%' && chars.peek().is_none();
                return Some((prefix, bare));
            }
            '\\' => prefix.push(chars.next()?),
            c => prefix.push(c),
        }
    }
    if prefix.is_empty() {
        None
    } else {
        Some((prefix, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_and_escapes() {
        let m = LikeMatcher::new("a%c", false).unwrap();
        assert!(m.is_match("abbbc"));
        assert!(!m.is_match("abbbd"));
        let m = LikeMatcher::new("100\\%", false).unwrap();
        assert!(m.is_match("100%"));
        assert!(!m.is_match("1000"));
        let m = LikeMatcher::new("a.b", false).unwrap();
        assert!(!m.is_match("axb"));
    }

    #[test]
    fn prefixes() {
        assert_eq!(literal_prefix("abc%"), Some(("abc".into(), true)));
        assert_eq!(literal_prefix("ab_d"), Some(("ab".into(), false)));
        assert_eq!(literal_prefix("abc"), Some(("abc".into(), false)));
        assert_eq!(literal_prefix("%abc"), None);
    }
}
