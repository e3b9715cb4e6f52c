//! Pattern compiler.
//!
//! Policy patterns are literal strings that may embed regular-expression
//! fragments bracketed by a per-policy delimiter pair (`<` and `>` by
//! default): `articles:<[0-9]+>` matches `articles:7` but not
//! `articles:7x`. Literal bytes are escaped, fragment bytes are passed
//! through verbatim as one capturing group each, and the result is
//! anchored on both ends so matches are always full-string.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHasher;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

/// Errors produced while turning a pattern into a regular expression.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A start delimiter inside a fragment, an end delimiter outside one,
    /// or a fragment left open at the end of the pattern.
    #[error("unbalanced pattern delimiter at byte {position}")]
    UnbalancedDelimiter { position: usize },
    /// The assembled expression was rejected by the regex engine.
    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Compile `source` into an anchored [`Regex`], treating `start_delim` and
/// `end_delim` as the fragment brackets. Single left-to-right scan, O(n) in
/// the pattern length.
pub fn compile(source: &str, start_delim: u8, end_delim: u8) -> Result<Regex, CompileError> {
    let mut pattern = String::with_capacity(source.len() + 8);
    pattern.push('^');

    let mut buffer = String::new();
    let mut in_fragment = false;
    for (position, ch) in source.char_indices() {
        let byte = ch.is_ascii().then_some(ch as u8);
        if byte == Some(end_delim) && in_fragment {
            pattern.push('(');
            pattern.push_str(&buffer);
            pattern.push(')');
            buffer.clear();
            in_fragment = false;
        } else if byte == Some(start_delim) && !in_fragment {
            pattern.push_str(&regex::escape(&buffer));
            buffer.clear();
            in_fragment = true;
        } else if byte == Some(start_delim) || byte == Some(end_delim) {
            return Err(CompileError::UnbalancedDelimiter { position });
        } else {
            buffer.push(ch);
        }
    }
    if in_fragment {
        return Err(CompileError::UnbalancedDelimiter {
            position: source.len(),
        });
    }
    pattern.push_str(&regex::escape(&buffer));
    pattern.push('$');

    Ok(Regex::new(&pattern)?)
}

/// Compilation results keyed by a hash of (source, delimiters). Policies
/// are matched on every decision, so recompiling per request would dominate
/// the hot path.
static COMPILED: Lazy<DashMap<u64, Arc<Regex>>> = Lazy::new(DashMap::new);

/// Shared, cached variant of [`compile`]. Two concurrent misses for the
/// same pattern may both compile; the results are equivalent and either
/// insertion may win.
pub fn compiled(source: &str, start_delim: u8, end_delim: u8) -> Result<Arc<Regex>, CompileError> {
    let mut hasher = AHasher::default();
    source.hash(&mut hasher);
    start_delim.hash(&mut hasher);
    end_delim.hash(&mut hasher);
    let key = hasher.finish();

    if let Some(existing) = COMPILED.get(&key) {
        return Ok(existing.clone());
    }
    let regex = Arc::new(compile(source, start_delim, end_delim)?);
    COMPILED.insert(key, regex.clone());
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_default(source: &str) -> Result<Regex, CompileError> {
        compile(source, b'<', b'>')
    }

    #[test]
    fn mixed_literal_and_fragment() {
        let re = compile_default("prefix-<[a-z]+>-suffix").unwrap();
        assert!(re.is_match("prefix-abc-suffix"));
        assert!(!re.is_match("prefix-ABC-suffix"));
    }

    #[test]
    fn matches_are_anchored() {
        let re = compile_default("articles:<[0-9]+>").unwrap();
        assert!(re.is_match("articles:42"));
        assert!(!re.is_match("articles:42x"));
        assert!(!re.is_match("xarticles:42"));
    }

    #[test]
    fn literal_metacharacters_are_escaped() {
        let re = compile_default("a.b+c").unwrap();
        assert!(re.is_match("a.b+c"));
        assert!(!re.is_match("axb+c"));
        assert!(!re.is_match("a.bbc"));
    }

    #[test]
    fn pure_literal_pattern() {
        let re = compile_default("create").unwrap();
        assert!(re.is_match("create"));
        assert!(!re.is_match("created"));
    }

    #[test]
    fn fragments_become_groups_left_to_right() {
        let re = compile_default("<[a-z]+>:<[0-9]+>").unwrap();
        let caps = re.captures("user:42").unwrap();
        assert_eq!(&caps[1], "user");
        assert_eq!(&caps[2], "42");
    }

    #[test]
    fn unclosed_fragment_is_rejected() {
        let err = compile_default("abc<def").unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnbalancedDelimiter { position: 7 }
        ));
    }

    #[test]
    fn stray_end_delimiter_is_rejected() {
        let err = compile_default("abc>def").unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnbalancedDelimiter { position: 3 }
        ));
    }

    #[test]
    fn nested_start_delimiter_is_rejected() {
        let err = compile_default("a<b<c>>").unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnbalancedDelimiter { position: 3 }
        ));
    }

    #[test]
    fn invalid_fragment_regex_is_rejected() {
        let err = compile_default("a<[>").unwrap_err();
        assert!(matches!(err, CompileError::InvalidRegex(_)));
    }

    #[test]
    fn custom_delimiters() {
        let re = compile("articles:{[0-9]+}", b'{', b'}').unwrap();
        assert!(re.is_match("articles:42"));
        // The default delimiters are plain literals under a custom pair.
        let re = compile("<literal>", b'{', b'}').unwrap();
        assert!(re.is_match("<literal>"));
    }

    #[test]
    fn cache_returns_shared_instance() {
        let a = compiled("cache:<.*>", b'<', b'>').unwrap();
        let b = compiled("cache:<.*>", b'<', b'>').unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_distinguishes_delimiters() {
        let angle = compiled("x<a>", b'<', b'>').unwrap();
        let brace = compiled("x<a>", b'{', b'}').unwrap();
        assert!(angle.is_match("xa"));
        assert!(brace.is_match("x<a>"));
    }
}
