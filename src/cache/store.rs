//! In-process tier.
//!
//! A lock-guarded map with per-entry hit counters. The store never evicts on
//! its own; the Background Maintainer calls [`MemoryStore::remove_expired`]
//! and [`MemoryStore::evict_to_bounds`] on a schedule. Bulk removals snapshot
//! under the read lock and delete in chunks.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;

use super::entry::CacheEntry;
use super::filter::EntryFilter;
use super::keys::CacheKey;
use super::lock::{read_guard, write_guard};

const SOURCE: &str = "cache::store";
const SWEEP_CHUNK: usize = 256;

struct Slot {
    entry: CacheEntry,
    hits: AtomicU64,
}

impl Slot {
    fn new(entry: CacheEntry) -> Self {
        let hits = AtomicU64::new(entry.hits);
        Self { entry, hits }
    }
}

/// A removal candidate captured during a snapshot.
///
/// `created_at` identifies the generation of the entry so a write that lands
/// between snapshot and removal is left alone.
struct Candidate {
    key: CacheKey,
    created_at: OffsetDateTime,
    hits: u64,
    size: u64,
}

pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, Slot>>,
    bytes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bytes: AtomicU64::new(0),
        }
    }

    /// Return a copy of a live entry and bump its hit counter.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey, now: OffsetDateTime) -> Option<CacheEntry> {
        {
            let entries = read_guard(&self.entries, SOURCE, "get");
            let slot = entries.get(key)?;
            if !slot.entry.is_expired(now) {
                let hits = slot.hits.fetch_add(1, Ordering::Relaxed) + 1;
                let mut entry = slot.entry.clone();
                entry.hits = hits;
                return Some(entry);
            }
        }

        let mut entries = write_guard(&self.entries, SOURCE, "get.expire");
        if entries.get(key).is_some_and(|slot| slot.entry.is_expired(now))
            && let Some(slot) = entries.remove(key)
        {
            self.release(&slot);
        }
        None
    }

    /// Insert or replace an entry. Last write wins.
    pub fn set(&self, entry: CacheEntry) {
        let size = entry.stored_size() as u64;
        let key = entry.key.clone();
        let mut entries = write_guard(&self.entries, SOURCE, "set");
        if let Some(previous) = entries.insert(key, Slot::new(entry)) {
            self.release(&previous);
        }
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn delete(&self, key: &CacheKey) -> bool {
        let removed = write_guard(&self.entries, SOURCE, "delete").remove(key);
        match removed {
            Some(slot) => {
                self.release(&slot);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        read_guard(&self.entries, SOURCE, "contains").contains_key(key)
    }

    pub fn count(&self) -> usize {
        read_guard(&self.entries, SOURCE, "count").len()
    }

    /// Aggregate stored payload bytes.
    pub fn size_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Remove entries whose TTL has elapsed. Returns the number removed.
    pub fn remove_expired(&self, now: OffsetDateTime) -> usize {
        let candidates = self.snapshot(|entry| entry.is_expired(now));
        self.remove_candidates(candidates).len()
    }

    /// Remove entries matching `filter`. Returns the number removed.
    pub fn remove_matching(&self, filter: &EntryFilter) -> usize {
        let candidates = self.snapshot(|entry| filter.matches(&entry.library_id, &entry.topic));
        self.remove_candidates(candidates).len()
    }

    /// Evict the least-hit entries until both bounds hold.
    ///
    /// Returns the evicted keys. Ties between equal hit counts are broken
    /// arbitrarily.
    pub fn evict_to_bounds(&self, max_entries: usize, max_bytes: u64) -> Vec<CacheKey> {
        let mut candidates = self.snapshot(|_| true);
        let mut count = candidates.len();
        let mut bytes: u64 = candidates.iter().map(|c| c.size).sum();
        if count <= max_entries && bytes <= max_bytes {
            return Vec::new();
        }

        candidates.sort_unstable_by_key(|candidate| candidate.hits);
        let mut victims = Vec::new();
        for candidate in candidates {
            if count <= max_entries && bytes <= max_bytes {
                break;
            }
            count -= 1;
            bytes = bytes.saturating_sub(candidate.size);
            victims.push(candidate);
        }

        self.remove_candidates(victims)
    }

    /// Drop everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut entries = write_guard(&self.entries, SOURCE, "clear");
        let removed = entries.len();
        entries.clear();
        self.bytes.store(0, Ordering::Relaxed);
        removed
    }

    fn snapshot(&self, mut select: impl FnMut(&CacheEntry) -> bool) -> Vec<Candidate> {
        read_guard(&self.entries, SOURCE, "snapshot")
            .iter()
            .filter(|(_, slot)| select(&slot.entry))
            .map(|(key, slot)| Candidate {
                key: key.clone(),
                created_at: slot.entry.created_at,
                hits: slot.hits.load(Ordering::Relaxed),
                size: slot.entry.stored_size() as u64,
            })
            .collect()
    }

    fn remove_candidates(&self, candidates: Vec<Candidate>) -> Vec<CacheKey> {
        let mut removed = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(SWEEP_CHUNK) {
            let mut entries = write_guard(&self.entries, SOURCE, "remove_candidates");
            for candidate in chunk {
                let same_generation = entries
                    .get(&candidate.key)
                    .is_some_and(|slot| slot.entry.created_at == candidate.created_at);
                if same_generation && let Some(slot) = entries.remove(&candidate.key) {
                    self.release(&slot);
                    removed.push(candidate.key.clone());
                }
            }
        }
        removed
    }

    fn release(&self, slot: &Slot) {
        self.bytes
            .fetch_sub(slot.entry.stored_size() as u64, Ordering::Relaxed);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
