//! Key normalization and listing filters.
//!
//! Keys are path-like strings with `/` as separator. Every key that reaches
//! a backend has been through [`normalize_key`], so drivers can rely on:
//! no leading or trailing separator, no empty or `.` segments, no `..`.

use regex::Regex;

use crate::error::{Result, StoreError};

/// Key separator.
pub const SEPARATOR: char = '/';

/// Normalizes a caller-supplied key.
///
/// Strips leading and trailing separators, collapses repeated separators and
/// drops `.` segments. Whitespace is part of the key.
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`] for empty keys and keys with `..`
/// segments.
pub fn normalize_key(key: &str) -> Result<String> {
    let normalized = normalize_prefix(key)?;
    if normalized.is_empty() {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: "key is empty",
        });
    }
    Ok(normalized)
}

/// Like [`normalize_key`] but accepts the empty string (the whole store).
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`] for prefixes with `..` segments.
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in prefix.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(StoreError::InvalidKey {
                    key: prefix.to_string(),
                    reason: "`..` segments are not allowed",
                })
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Prepends `namespace` to `key`. An empty namespace is a no-op.
#[must_use]
pub fn join_key(namespace: &str, key: &str) -> String {
    match (namespace.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => namespace.to_string(),
        (false, false) => format!("{namespace}/{key}"),
    }
}

/// Removes `namespace` from the front of `key`.
///
/// Returns `None` if `key` does not live under `namespace`.
#[must_use]
pub fn strip_namespace<'a>(namespace: &str, key: &'a str) -> Option<&'a str> {
    if namespace.is_empty() {
        return Some(key);
    }
    key.strip_prefix(namespace)?.strip_prefix(SEPARATOR)
}

/// `true` if `key` is `prefix` itself or lives below it.
///
/// Matching is segment-aware: prefix `topic` matches `topic/a` but not
/// `topics/a`. The empty prefix matches everything.
#[must_use]
pub fn has_prefix(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Last path segment of a key.
#[must_use]
pub fn key_name(key: &str) -> &str {
    key.rsplit(SEPARATOR).next().unwrap_or(key)
}

/// Translates a path-style glob into an anchored regular expression.
///
/// - `**/` matches zero or more whole directories
/// - `**` matches anything, separators included
/// - `*` matches anything within one segment
/// - `?` matches one character within a segment
/// - `[...]` character classes pass through (`[!...]` negates)
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`] if the resulting expression does not compile
/// (e.g. an unterminated character class).
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut re = String::with_capacity(glob.len() * 2 + 2);
    re.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut in_class = false;
    let mut i = 0;
    while i < chars.len() {
        if in_class {
            match chars[i] {
                ']' => {
                    re.push(']');
                    in_class = false;
                }
                c @ ('\\' | '[' | '&' | '~') => {
                    re.push('\\');
                    re.push(c);
                }
                c => re.push(c),
            }
            i += 1;
            continue;
        }
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                re.push('[');
                in_class = true;
                if chars.get(i + 1) == Some(&'!') {
                    re.push('^');
                    i += 1;
                }
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    Regex::new(&re).map_err(|_| StoreError::InvalidKey {
        key: glob.to_string(),
        reason: "invalid glob pattern",
    })
}

/// Combined listing filter: prefix, excluded prefix and glob.
///
/// The glob is matched against the part of the key below `prefix`, so
/// `prefix = "dataset"` with `glob = "*.pdf"` selects `dataset/a.pdf`.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    prefix: String,
    exclude_prefix: Option<String>,
    glob: Option<Regex>,
    glob_source: Option<String>,
}

impl KeyFilter {
    /// Creates a filter that accepts every key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to keys at or below `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the prefix has `..` segments.
    pub fn with_prefix(mut self, prefix: &str) -> Result<Self> {
        self.prefix = normalize_prefix(prefix)?;
        Ok(self)
    }

    /// Rejects keys at or below `exclude_prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the prefix has `..` segments.
    pub fn with_exclude_prefix(mut self, exclude_prefix: &str) -> Result<Self> {
        let normalized = normalize_prefix(exclude_prefix)?;
        self.exclude_prefix = (!normalized.is_empty()).then_some(normalized);
        Ok(self)
    }

    /// Restricts to keys whose remainder below the prefix matches `glob`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the glob does not compile.
    pub fn with_glob(mut self, glob: &str) -> Result<Self> {
        let glob = glob.trim_start_matches(SEPARATOR);
        if !glob.is_empty() {
            self.glob = Some(glob_to_regex(glob)?);
            self.glob_source = Some(glob.to_string());
        }
        Ok(self)
    }

    /// Builds a filter from optional parts.
    ///
    /// # Errors
    ///
    /// Propagates errors from the individual builders.
    pub fn from_parts(
        prefix: Option<&str>,
        exclude_prefix: Option<&str>,
        glob: Option<&str>,
    ) -> Result<Self> {
        let mut filter = Self::new();
        if let Some(prefix) = prefix {
            filter = filter.with_prefix(prefix)?;
        }
        if let Some(exclude) = exclude_prefix {
            filter = filter.with_exclude_prefix(exclude)?;
        }
        if let Some(glob) = glob {
            filter = filter.with_glob(glob)?;
        }
        Ok(filter)
    }

    /// The normalized prefix (empty for "everything").
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The glob as given, if any.
    #[must_use]
    pub fn glob(&self) -> Option<&str> {
        self.glob_source.as_deref()
    }

    /// Returns a copy of this filter with `namespace` prepended to both
    /// prefixes, for use against physical (namespaced) keys.
    #[must_use]
    pub fn scoped(&self, namespace: &str) -> Self {
        Self {
            prefix: join_key(namespace, &self.prefix),
            exclude_prefix: self
                .exclude_prefix
                .as_ref()
                .map(|p| join_key(namespace, p)),
            glob: self.glob.clone(),
            glob_source: self.glob_source.clone(),
        }
    }

    /// `true` if `key` passes every configured criterion.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        if !has_prefix(key, &self.prefix) {
            return false;
        }
        if let Some(exclude) = &self.exclude_prefix {
            if has_prefix(key, exclude) {
                return false;
            }
        }
        match &self.glob {
            Some(glob) => {
                let rest = key[self.prefix.len()..].trim_start_matches(SEPARATOR);
                glob.is_match(rest)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn whitespace_is_significant() {
        assert_eq!(normalize_key(" a").unwrap(), " a");
        assert_eq!(normalize_key("dir/ b /").unwrap(), "dir/ b ");
        assert_ne!(normalize_key(" a").unwrap(), normalize_key("a").unwrap());
    }

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize_key("/foo//bar/").unwrap(), "foo/bar");
        assert_eq!(normalize_key("./a/./b").unwrap(), "a/b");
        assert!(normalize_key("///").is_err());
        assert!(normalize_key("a/../b").is_err());
        assert_eq!(normalize_prefix("").unwrap(), "");
    }

    #[test]
    fn namespace_join_and_strip() {
        assert_eq!(join_key("ns", "a/b"), "ns/a/b");
        assert_eq!(join_key("", "a"), "a");
        assert_eq!(strip_namespace("ns", "ns/a/b"), Some("a/b"));
        assert_eq!(strip_namespace("ns", "nsx/a"), None);
        assert_eq!(strip_namespace("", "a"), Some("a"));
    }

    #[test]
    fn prefix_is_segment_aware() {
        assert!(has_prefix("topic/a", "topic"));
        assert!(has_prefix("topic", "topic"));
        assert!(!has_prefix("topics/a", "topic"));
        assert!(has_prefix("anything", ""));
    }

    #[test]
    fn glob_translation() {
        let re = glob_to_regex("*.json").unwrap();
        assert!(re.is_match("a.json"));
        assert!(!re.is_match("dir/a.json"));

        let re = glob_to_regex("foo/**/*.json").unwrap();
        assert!(re.is_match("foo/a.json"));
        assert!(re.is_match("foo/x/y/a.json"));
        assert!(!re.is_match("bar/a.json"));

        let re = glob_to_regex("file-[!0-9]?.txt").unwrap();
        assert!(re.is_match("file-ab.txt"));
        assert!(!re.is_match("file-1b.txt"));

        let re = glob_to_regex("a+b(c).txt").unwrap();
        assert!(re.is_match("a+b(c).txt"));
        assert!(glob_to_regex("broken[").is_err());
    }

    #[test]
    fn filter_combines_criteria() {
        let filter = KeyFilter::from_parts(Some("dataset"), Some("dataset/tmp"), Some("**/*.pdf"))
            .unwrap();
        assert!(filter.matches("dataset/a.pdf"));
        assert!(filter.matches("dataset/sub/b.pdf"));
        assert!(!filter.matches("dataset/a.txt"));
        assert!(!filter.matches("dataset/tmp/c.pdf"));
        assert!(!filter.matches("other/a.pdf"));
    }

    #[test]
    fn filter_selects_topic_keys() {
        let filter = KeyFilter::new().with_prefix("topic").unwrap();
        let keys = ["topic/a", "topic/b", "other/c"];
        let selected: Vec<_> = keys.iter().filter(|k| filter.matches(k)).collect();
        assert_eq!(selected, vec![&"topic/a", &"topic/b"]);
    }

    #[test]
    fn scoped_filter_applies_namespace() {
        let filter = KeyFilter::from_parts(Some("a"), Some("a/x"), None).unwrap().scoped("ns");
        assert_eq!(filter.prefix(), "ns/a");
        assert!(filter.matches("ns/a/b"));
        assert!(!filter.matches("ns/a/x/y"));
        assert!(!filter.matches("a/b"));
    }

    #[test]
    fn key_name_is_last_segment() {
        assert_eq!(key_name("a/b/c.txt"), "c.txt");
        assert_eq!(key_name("c"), "c");
    }

    proptest! {
        #[test]
        fn normalized_keys_are_stable(key in "[a-z/]{1,20}") {
            if let Ok(normalized) = normalize_key(&key) {
                prop_assert!(!normalized.starts_with('/'));
                prop_assert!(!normalized.ends_with('/'));
                prop_assert!(!normalized.contains("//"));
                prop_assert_eq!(normalize_key(&normalized).unwrap(), normalized);
            }
        }
    }
}
