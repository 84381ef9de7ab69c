//! Cache key derivation.
//!
//! Keys have the shape `v1:<library>:<topic>:<tokens>[:<context-hash>]`.
//! Bumping [`SCHEMA_VERSION`] orphans every previously written entry; the
//! orphans age out through normal TTL expiry.

use std::fmt;
use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix of every key. Bump when the entry layout changes.
pub const SCHEMA_VERSION: &str = "v1";
/// Topic used when the caller supplies none.
pub const DEFAULT_TOPIC: &str = "default";

const MAX_TOPIC_SEGMENT_LEN: usize = 50;
const SHORT_HASH_LEN: usize = 16;
const TOKEN_BUCKET: u32 = 100;
const FALLBACK_LIBRARY: &str = "unknown";

/// A derived, opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Rehydrate a key read back from storage.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// A key together with the normalized dimensions it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocKey {
    pub key: CacheKey,
    pub library_id: String,
    pub topic: String,
    pub token_budget: u32,
}

/// Derive the key for a documentation request.
pub fn build_key(
    library_id: &str,
    topic: &str,
    token_budget: u32,
    context: Option<&Value>,
) -> DocKey {
    let segment = library_segment(library_id);
    let library_id = normalize_library_id(library_id);
    let topic = normalize_topic(topic);
    let token_budget = round_token_budget(token_budget);

    let mut key = format!(
        "{SCHEMA_VERSION}:{segment}:{}:{token_budget}",
        topic_segment(&topic)
    );
    if let Some(context) = context {
        key.push(':');
        key.push_str(&context_hash(context));
    }

    DocKey {
        key: CacheKey(key),
        library_id,
        topic,
        token_budget,
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@')
}

/// Lowercase and restrict a library identifier to `[a-z0-9-_./@]`.
///
/// Invalidation by library applies the same normalization, so callers may
/// pass identifiers in any case.
pub fn normalize_library_id(library_id: &str) -> String {
    let normalized: String = library_id
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if is_safe_char(c) { c } else { '_' }
        })
        .collect();

    if normalized.is_empty() {
        FALLBACK_LIBRARY.to_string()
    } else {
        normalized
    }
}

/// Trimmed, lowercased topic; blank topics become [`DEFAULT_TOPIC`].
pub fn normalize_topic(topic: &str) -> String {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        DEFAULT_TOPIC.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// The library as it appears inside the key.
///
/// Identifiers that normalize without replacing any character are used as-is.
/// Others become `l` plus a hash of the lowercased input, so `my lib` and
/// `my_lib` get distinct keys while sharing the `my_lib` library column.
fn library_segment(library_id: &str) -> String {
    let lowered = library_id.trim().to_lowercase();
    if lowered.is_empty() || lowered.chars().all(is_safe_char) {
        normalize_library_id(library_id)
    } else {
        format!("l{}", short_hash(lowered.as_bytes()))
    }
}

/// The topic as it appears inside the key.
///
/// Short topics made of safe characters are used verbatim. Anything longer or
/// containing other characters collapses to `t` plus a short hash, which keeps
/// keys bounded and avoids two topics sanitizing to the same text.
fn topic_segment(topic: &str) -> String {
    if topic.len() <= MAX_TOPIC_SEGMENT_LEN && topic.chars().all(is_safe_char) {
        topic.to_string()
    } else {
        format!("t{}", short_hash(topic.as_bytes()))
    }
}

/// Round to the nearest hundred, ties to the even hundred.
///
/// 3950 and 4050 both coalesce onto 4000.
pub fn round_token_budget(token_budget: u32) -> u32 {
    let buckets = token_budget / TOKEN_BUCKET;
    let remainder = token_budget % TOKEN_BUCKET;
    let half = TOKEN_BUCKET / 2;
    let round_up = remainder > half || (remainder == half && buckets % 2 == 1);
    let rounded_down = buckets * TOKEN_BUCKET;
    if round_up {
        rounded_down.checked_add(TOKEN_BUCKET).unwrap_or(rounded_down)
    } else {
        rounded_down
    }
}

/// Hash of the context rendered with object keys in sorted order.
pub fn context_hash(context: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(context, &mut canonical);
    short_hash(canonical.as_bytes())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(SHORT_HASH_LEN);
    hex
}
