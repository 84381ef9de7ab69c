//! Invalidation scopes.

use std::fmt;
use std::str::FromStr;

use glob::{Pattern, PatternError};

use super::keys::normalize_library_id;

/// What `DocsCache::invalidate` removes.
#[derive(Debug, Clone)]
pub enum Invalidation {
    /// Every entry for one library.
    Library(String),
    /// Entries whose library and topic match a [`KeyPattern`].
    Pattern(KeyPattern),
    /// Only entries past their TTL.
    Expired,
    /// Everything in both tiers.
    All,
}

impl Invalidation {
    pub fn library(library_id: impl Into<String>) -> Self {
        Self::Library(library_id.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, PatternError> {
        pattern.parse().map(Self::Pattern)
    }
}

/// A `<library-glob>[:<topic-glob>]` pattern, e.g. `react*` or `*:troubleshooting`.
///
/// Globs support `*`, `?` and `[...]`, are matched case-insensitively against
/// normalized dimensions, and a missing topic part matches every topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    library: Pattern,
    topic: Pattern,
}

impl KeyPattern {
    pub fn library_glob(&self) -> &str {
        self.library.as_str()
    }

    pub fn topic_glob(&self) -> &str {
        self.topic.as_str()
    }

    /// Literal characters the library glob starts with, up to the first
    /// wildcard. Every matching library id begins with this prefix.
    pub fn library_prefix(&self) -> &str {
        let glob = self.library.as_str();
        let end = glob.find(['*', '?', '[']).unwrap_or(glob.len());
        &glob[..end]
    }

    pub fn matches(&self, library_id: &str, topic: &str) -> bool {
        self.library.matches(library_id) && self.topic.matches(topic)
    }
}

impl FromStr for KeyPattern {
    type Err = PatternError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_lowercase();
        let (library, topic) = match lowered.split_once(':') {
            Some((library, topic)) => (library.trim(), topic.trim()),
            None => (lowered.as_str(), ""),
        };
        let library = if library.is_empty() { "*" } else { library };
        let topic = if topic.is_empty() { "*" } else { topic };

        Ok(Self {
            library: Pattern::new(library)?,
            topic: Pattern::new(topic)?,
        })
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.library, self.topic)
    }
}

/// A scope both tiers know how to delete by.
#[derive(Debug, Clone)]
pub enum EntryFilter {
    /// Normalized library identifier.
    Library(String),
    Pattern(KeyPattern),
}

impl EntryFilter {
    pub fn library(library_id: &str) -> Self {
        Self::Library(normalize_library_id(library_id))
    }

    pub fn matches(&self, library_id: &str, topic: &str) -> bool {
        match self {
            Self::Library(id) => id == library_id,
            Self::Pattern(pattern) => pattern.matches(library_id, topic),
        }
    }
}
