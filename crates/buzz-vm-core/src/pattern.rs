//! Pattern objects
//!
//! A pattern is an opaque handle around a compiled regex. The byte-identical
//! source text is the pattern's identity: equality, hashing, and chunk
//! serialization all go through it, so a pattern survives a cache
//! round-trip unchanged.

use regress::Regex;

use crate::error::{SourceLocation, VmError, VmResult};

/// A compiled pattern.
pub struct ObjPattern {
    source: String,
    regex: Regex,
}

impl ObjPattern {
    /// Compile a pattern from its source text. A malformed pattern is a
    /// compile-time diagnostic.
    pub fn new(source: impl Into<String>, location: SourceLocation) -> VmResult<Self> {
        let source = source.into();
        let regex = Regex::new(&source)
            .map_err(|err| VmError::compile(format!("bad pattern: {err}"), location))?;
        Ok(Self { source, regex })
    }

    /// The pattern's source text.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match the pattern once against `subject`.
    ///
    /// Returns `None` when the pattern does not match; otherwise the list
    /// of captures, index 0 being the whole match. Unmatched optional
    /// groups are `None`.
    pub fn match_once(&self, subject: &str) -> Option<Vec<Option<String>>> {
        let m = self.regex.find(subject)?;
        Some(Self::captures_of(&m, subject))
    }

    /// Match the pattern repeatedly, returning one capture list per match.
    /// Returns `None` when there is no match at all.
    pub fn match_all(&self, subject: &str) -> Option<Vec<Vec<Option<String>>>> {
        let matches: Vec<_> = self
            .regex
            .find_iter(subject)
            .map(|m| Self::captures_of(&m, subject))
            .collect();
        if matches.is_empty() {
            None
        } else {
            Some(matches)
        }
    }

    fn captures_of(m: &regress::Match, subject: &str) -> Vec<Option<String>> {
        let mut captures = Vec::with_capacity(1 + m.captures.len());
        captures.push(Some(subject[m.range.clone()].to_string()));
        for group in &m.captures {
            captures.push(group.clone().map(|range| subject[range].to_string()));
        }
        captures
    }
}

impl std::fmt::Debug for ObjPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjPattern({:?})", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> SourceLocation {
        SourceLocation::new("test.buzz", 1, 1)
    }

    #[test]
    fn match_returns_all_captures() {
        let pattern = ObjPattern::new(r"(\d+)-(\d+)", here()).unwrap();
        let captures = pattern.match_once("order 12-34 shipped").unwrap();
        assert_eq!(
            captures,
            vec![
                Some("12-34".to_string()),
                Some("12".to_string()),
                Some("34".to_string()),
            ]
        );
    }

    #[test]
    fn no_match_is_none() {
        let pattern = ObjPattern::new(r"\d+", here()).unwrap();
        assert!(pattern.match_once("no digits here").is_none());
        assert!(pattern.match_all("no digits here").is_none());
    }

    #[test]
    fn match_all_returns_every_match() {
        let pattern = ObjPattern::new(r"(\w+)@(\w+)", here()).unwrap();
        let all = pattern.match_all("a@b c@d").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0][1], Some("a".to_string()));
        assert_eq!(all[1][2], Some("d".to_string()));
    }

    #[test]
    fn unmatched_group_is_null() {
        let pattern = ObjPattern::new(r"(a)(b)?", here()).unwrap();
        let captures = pattern.match_once("a").unwrap();
        assert_eq!(captures[1], Some("a".to_string()));
        assert_eq!(captures[2], None);
    }

    #[test]
    fn bad_pattern_is_a_compile_error() {
        let result = ObjPattern::new(r"(unclosed", here());
        assert!(matches!(result, Err(VmError::Compile { .. })));
    }
}
