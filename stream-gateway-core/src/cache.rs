//! Probe cache (C2): process-wide map from normalised path to unified
//! probe result, with TTL eviction. Never stores raw ffprobe JSON — only
//! the distilled [`UnifiedProbeResult`](crate::types::UnifiedProbeResult).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::types::UnifiedProbeResult;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct Entry {
    value: UnifiedProbeResult,
    inserted_at: u64,
}

/// Normalises a path the way the cache keys it: strip a leading mount
/// prefix, lower-case the scheme. Two paths that only differ in the
/// mount prefix or scheme casing are the same cache entry.
pub fn normalize_path(path: &str) -> String {
    let stripped = path
        .strip_prefix("/mnt")
        .or_else(|| path.strip_prefix("/media"))
        .unwrap_or(path);

    if let Some(idx) = stripped.find("://") {
        let (scheme, rest) = stripped.split_at(idx);
        format!("{}{}", scheme.to_lowercase(), rest)
    } else {
        stripped.to_string()
    }
}

/// A single in-flight probe, deduplicated per normalised path so
/// concurrent probes of the same path share one ffprobe invocation.
type InFlight = Arc<OnceCell<Result<UnifiedProbeResult, String>>>;

pub struct ProbeCache {
    entries: DashMap<String, Entry>,
    in_flight: DashMap<String, InFlight>,
    ttl_secs: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeCacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
}

impl ProbeCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            ttl_secs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Read path: lock-free lookup under DashMap's shard-level
    /// readers-writer discipline. TTL-expired entries are treated as a
    /// miss but not eagerly removed (the reaper / next write does that).
    pub fn get(&self, path: &str) -> Option<UnifiedProbeResult> {
        let key = normalize_path(path);
        match self.entries.get(&key) {
            Some(entry) if now_secs().saturating_sub(entry.inserted_at) <= self.ttl_secs => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write path: append/overwrite, last-writer-wins.
    pub fn put(&self, path: &str, value: UnifiedProbeResult) {
        let key = normalize_path(path);
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now_secs(),
            },
        );
    }

    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now_secs().saturating_sub(e.inserted_at) <= self.ttl_secs);
        before - self.entries.len()
    }

    pub fn stats(&self) -> ProbeCacheStats {
        ProbeCacheStats {
            entry_count: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Returns the single-flight cell for `path`, creating one if absent.
    /// Callers `get_or_try_init` on the returned cell and then remove it
    /// from the in-flight map once resolved, so a later probe of the same
    /// path starts fresh rather than replaying a stale result.
    pub fn in_flight_cell(&self, path: &str) -> InFlight {
        let key = normalize_path(path);
        self.in_flight
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub fn clear_in_flight(&self, path: &str) {
        let key = normalize_path(path);
        self.in_flight.remove(&key);
    }
}

impl Default for ProbeCache {
    fn default() -> Self {
        Self::new(300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnifiedProbeResult {
        UnifiedProbeResult {
            duration_secs: 120.0,
            has_dolby_vision: false,
            has_hdr10: false,
            dolby_vision_profile: None,
            has_truehd: false,
            has_compatible_audio: true,
            audio_streams: vec![],
            subtitle_streams: vec![],
        }
    }

    #[test]
    fn put_then_get_is_read_consistent() {
        let cache = ProbeCache::new(300);
        cache.put("/mnt/movies/a.mkv", sample());
        assert!(cache.get("/mnt/movies/a.mkv").is_some());
    }

    #[test]
    fn normalize_path_strips_mount_and_lowercases_scheme() {
        assert_eq!(normalize_path("/mnt/movies/a.mkv"), "/movies/a.mkv");
        assert_eq!(
            normalize_path("HTTP://example.com/a.mkv"),
            "http://example.com/a.mkv"
        );
    }

    #[test]
    fn expired_entry_is_treated_as_miss() {
        let cache = ProbeCache::new(0);
        cache.put("/x.mkv", sample());
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(cache.get("/x.mkv").is_none());
    }

    #[test]
    fn evict_expired_removes_only_stale_entries() {
        let cache = ProbeCache::new(0);
        cache.put("/x.mkv", sample());
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.put("/y.mkv", sample());
        let removed = cache.evict_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn in_flight_cell_is_shared_across_calls_for_same_path() {
        let cache = ProbeCache::new(300);
        let a = cache.in_flight_cell("/mnt/x.mkv");
        let b = cache.in_flight_cell("/x.mkv");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
