//! Namespace parsing, formatting, and wildcard matching.
//!
//! A namespace is a dotted path such as `$.main.toolbar.title`. Two reserved
//! segments act as selectors:
//!
//! - `$every` matches exactly one arbitrary segment at its position.
//! - `$all` matches one or more trailing segments and must be the last segment.
//!
//! Everything before the first selector is the *base path*; the selector and
//! everything after it is the *wildcard suffix*.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

use crate::error::{StateNetError, StateNetResult};

/// Separator between namespace segments.
pub const SEPARATOR: char = '.';

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

static SEGMENT_PATTERN: OnceLock<Regex> = OnceLock::new();

/// A reserved wildcard segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// `$every`: exactly one segment.
    Every,
    /// `$all`: one or more trailing segments.
    All,
}

impl Selector {
    /// Recognizes a selector segment.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "$every" => Some(Self::Every),
            "$all" => Some(Self::All),
            _ => None,
        }
    }

    /// The literal segment text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Every => "$every",
            Self::All => "$all",
        }
    }

    const fn pattern(self) -> &'static str {
        match self {
            Self::Every => "[^.]+",
            Self::All => ".+",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true when `segment` is `$every` or `$all`.
#[must_use]
pub fn is_selector(segment: &str) -> bool {
    Selector::from_segment(segment).is_some()
}

/// A namespace split into its base path and optional wildcard suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNamespace {
    /// Every segment, in order.
    pub segments: Vec<String>,
    /// Segments before the first selector.
    pub base: Vec<String>,
    /// The first selector and everything after it, joined with `.`.
    pub wildcard: Option<String>,
}

impl ParsedNamespace {
    /// True when the namespace contains a selector.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        self.wildcard.is_some()
    }
}

fn segment_pattern() -> &'static Regex {
    SEGMENT_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_$]+$").expect("segment grammar is a valid regex")
    })
}

/// Checks the segment grammar and selector placement.
pub fn validate(namespace: &str) -> StateNetResult<()> {
    if namespace.is_empty() {
        return Err(StateNetError::invalid_namespace(namespace, "namespace is empty"));
    }

    let segments: Vec<&str> = namespace.split(SEPARATOR).collect();
    let last = segments.len() - 1;
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(StateNetError::invalid_namespace(namespace, "empty segment"));
        }
        if !segment_pattern().is_match(segment) {
            return Err(StateNetError::invalid_namespace(
                namespace,
                format!("segment '{segment}' contains characters outside [A-Za-z0-9_$]"),
            ));
        }
        if *segment == Selector::All.as_str() && idx != last {
            return Err(StateNetError::invalid_namespace(
                namespace,
                "$all is only valid as the final segment",
            ));
        }
    }

    Ok(())
}

/// Splits a namespace into base path and wildcard suffix.
pub fn parse(namespace: &str) -> StateNetResult<ParsedNamespace> {
    validate(namespace)?;

    let segments: Vec<String> = namespace.split(SEPARATOR).map(str::to_string).collect();
    let split = segments
        .iter()
        .position(|s| is_selector(s))
        .unwrap_or(segments.len());

    let base = segments[..split].to_vec();
    let wildcard = (split < segments.len()).then(|| format(&segments[split..]));

    Ok(ParsedNamespace {
        segments,
        base,
        wildcard,
    })
}

/// Joins a parent namespace and a local name.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        return name.to_string();
    }
    if name.is_empty() {
        return parent.to_string();
    }
    let mut out = String::with_capacity(parent.len() + name.len() + 1);
    out.push_str(parent);
    out.push(SEPARATOR);
    out.push_str(name);
    out
}

/// Joins segments into a namespace string.
#[must_use]
pub fn format<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for (idx, segment) in segments.iter().enumerate() {
        if idx > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

/// True when `namespace` equals `scope` or lies beneath it, compared segment-wise.
#[must_use]
pub fn is_within(namespace: &str, scope: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    namespace
        .strip_prefix(scope)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(SEPARATOR))
}

/// A compiled matcher for one wildcard namespace.
#[derive(Debug, Clone)]
pub struct NamespaceMatcher {
    regex: Regex,
}

impl NamespaceMatcher {
    /// Tests a literal namespace.
    #[must_use]
    pub fn is_match(&self, namespace: &str) -> bool {
        self.regex.is_match(namespace)
    }

    /// The anchored pattern text.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Builds an anchored matcher from a base path and a wildcard suffix.
///
/// The base path is matched literally; `$every` becomes exactly one segment and
/// `$all` becomes one or more segments.
pub fn compile<S: AsRef<str>>(base: &[S], wildcard: &str) -> StateNetResult<NamespaceMatcher> {
    let mut pattern = String::from("^");
    for (idx, segment) in base.iter().enumerate() {
        if idx > 0 {
            pattern.push_str(r"\.");
        }
        pattern.push_str(&regex::escape(segment.as_ref()));
    }

    for (idx, segment) in wildcard.split(SEPARATOR).enumerate() {
        if idx > 0 || !base.is_empty() {
            pattern.push_str(r"\.");
        }
        match Selector::from_segment(segment) {
            Some(selector) => pattern.push_str(selector.pattern()),
            None => pattern.push_str(&regex::escape(segment)),
        }
    }
    pattern.push('$');

    Ok(NamespaceMatcher {
        regex: cached_regex(&pattern)?,
    })
}

fn cached_regex(pattern: &str) -> StateNetResult<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| StateNetError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern)
        .map_err(|e| StateNetError::internal(format!("invalid namespace pattern '{pattern}': {e}")))?;

    let mut guard = cache
        .write()
        .map_err(|_| StateNetError::internal("regex cache lock poisoned"))?;

    if guard.len() >= REGEX_CACHE_MAX {
        // Keep the cache bounded.
        guard.clear();
    }

    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_namespace() {
        let parsed = parse("$.toolbar.title").unwrap();
        assert_eq!(parsed.segments, vec!["$", "toolbar", "title"]);
        assert_eq!(parsed.base, vec!["$", "toolbar", "title"]);
        assert!(!parsed.is_wildcard());
    }

    #[test]
    fn parse_splits_at_first_selector() {
        let parsed = parse("a.b.$every.d.$all").unwrap();
        assert_eq!(parsed.base, vec!["a", "b"]);
        assert_eq!(parsed.wildcard.as_deref(), Some("$every.d.$all"));
    }

    #[test]
    fn parse_rejects_bad_grammar() {
        for ns in ["", "a..b", "a.", ".a", "a.b-c", "a b", "a.$all.b"] {
            let err = parse(ns).unwrap_err();
            assert!(err.is_validation(), "expected validation error for {ns:?}");
        }
    }

    #[test]
    fn selector_recognition() {
        assert!(is_selector("$every"));
        assert!(is_selector("$all"));
        assert!(!is_selector("$"));
        assert!(!is_selector("every"));
    }

    #[test]
    fn join_and_format() {
        assert_eq!(join("$.main", "left"), "$.main.left");
        assert_eq!(join("", "left"), "left");
        assert_eq!(join("$.main", ""), "$.main");
        assert_eq!(format(&["a", "b", "c"]), "a.b.c");
        assert_eq!(format::<&str>(&[]), "");
    }

    #[test]
    fn within_is_segment_wise() {
        assert!(is_within("a.b", "a.b"));
        assert!(is_within("a.b.c", "a.b"));
        assert!(!is_within("a.bc", "a.b"));
        assert!(!is_within("a", "a.b"));
        assert!(is_within("anything", ""));
    }

    #[test]
    fn every_matches_exactly_one_segment() {
        let m = compile(&["a", "b"], "$every").unwrap();
        assert!(m.is_match("a.b.c"));
        assert!(!m.is_match("a.b.c.d"));
        assert!(!m.is_match("a.b"));
        assert!(!m.is_match("x.a.b.c"));
    }

    #[test]
    fn every_in_the_middle() {
        let m = compile(&["a"], "$every.c").unwrap();
        assert!(m.is_match("a.b.c"));
        assert!(m.is_match("a.x.c"));
        assert!(!m.is_match("a.b.d"));
        assert!(!m.is_match("a.b.x.c"));
    }

    #[test]
    fn all_matches_one_or_more_segments() {
        let m = compile(&["a"], "$all").unwrap();
        assert!(m.is_match("a.b"));
        assert!(m.is_match("a.b.c.d"));
        assert!(!m.is_match("a"));
        assert!(!m.is_match("ab.c"));
    }

    #[test]
    fn literal_dollar_segments_are_escaped() {
        let m = compile(&["$", "items"], "$every").unwrap();
        assert!(m.is_match("$.items.0"));
        assert!(!m.is_match("x.items.0"));
    }

    #[test]
    fn empty_base_wildcard() {
        let m = compile::<&str>(&[], "$every.name").unwrap();
        assert!(m.is_match("user.name"));
        assert!(!m.is_match("a.user.name"));
    }

    #[test]
    fn compiled_patterns_are_shared() {
        let a = compile(&["shared"], "$all").unwrap();
        let b = compile(&["shared"], "$all").unwrap();
        assert_eq!(a.pattern(), b.pattern());
        assert_eq!(a.pattern(), r"^shared\..+$");
    }
}
