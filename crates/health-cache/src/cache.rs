use crate::clock::{Clock, SystemClock};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Freshness window of a cache entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ttl {
    /// Never expires; replaced only by an explicit `set` or `remove`.
    Never,
    /// Expires once this much time has elapsed since the last `set`.
    /// A zero window is stale as soon as any time has passed.
    After(Duration),
}

impl Ttl {
    /// Signed seconds: negative means [`Ttl::Never`].
    pub fn from_secs(secs: i64) -> Self {
        if secs < 0 {
            Ttl::Never
        } else {
            Ttl::After(Duration::from_secs(secs.unsigned_abs()))
        }
    }

    pub fn is_fresh(&self, elapsed: Duration) -> bool {
        match self {
            Ttl::Never => true,
            Ttl::After(window) if window.is_zero() => elapsed.is_zero(),
            Ttl::After(window) => elapsed < *window,
        }
    }
}

impl From<i64> for Ttl {
    fn from(secs: i64) -> Self {
        Ttl::from_secs(secs)
    }
}

/// Result of a cache read. A miss covers both "never set" and "expired".
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Lookup::Hit(v) => Some(v),
            Lookup::Miss => None,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    ttl: Ttl,
    updated_at: Instant,
}

/// Key/value store where each entry carries its own TTL.
///
/// Single-key operations are linearizable: every read and write takes the
/// map lock, so a reader never observes half of an overwrite. There is no
/// cross-key atomicity.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the value if present and still fresh.
    pub fn get(&self, key: &str) -> Lookup<V> {
        let now = self.clock.now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if Self::fresh(entry, now) => Lookup::Hit(entry.value.clone()),
            _ => Lookup::Miss,
        }
    }

    /// Inserts or overwrites `key`, restarting its freshness window.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Ttl) {
        let entry = CacheEntry {
            value,
            ttl,
            updated_at: self.clock.now(),
        };
        self.entries.write().insert(key.into(), entry);
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .get(key)
            .map(|entry| Self::fresh(entry, now))
            .unwrap_or(false)
    }

    /// Drops the entry together with its TTL and timestamp.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.write().remove(key).map(|entry| entry.value)
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn fresh(entry: &CacheEntry<V>, now: Instant) -> bool {
        entry
            .ttl
            .is_fresh(now.saturating_duration_since(entry.updated_at))
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn cache_with_clock() -> (TtlCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TtlCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let (cache, _clock) = cache_with_clock();
        cache.set("memory", 42, Ttl::from_secs(2));
        assert_eq!(cache.get("memory"), Lookup::Hit(42));
        assert!(cache.has("memory"));
    }

    #[test]
    fn test_missing_key_is_miss() {
        let (cache, _clock) = cache_with_clock();
        assert_eq!(cache.get("nothing"), Lookup::Miss);
        assert!(!cache.has("nothing"));
    }

    #[test]
    fn test_positive_ttl_expires_at_boundary() {
        let (cache, clock) = cache_with_clock();
        cache.set("cpu", 1, Ttl::from_secs(2));
        clock.advance(Duration::from_millis(1999));
        assert!(cache.has("cpu"));
        clock.advance(Duration::from_millis(1));
        assert!(!cache.has("cpu"));
        assert_eq!(cache.get("cpu"), Lookup::Miss);
        clock.advance(Duration::from_secs(60));
        assert!(!cache.has("cpu"));
    }

    #[test]
    fn test_zero_ttl_expires_once_time_passes() {
        let (cache, clock) = cache_with_clock();
        cache.set("status", 7, Ttl::from_secs(0));
        assert!(cache.has("status"));
        clock.advance(Duration::from_nanos(1));
        assert!(!cache.has("status"));
    }

    #[test]
    fn test_negative_ttl_never_expires() {
        let (cache, clock) = cache_with_clock();
        cache.set("hardware", 3, Ttl::from_secs(-1));
        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        assert!(cache.has("hardware"));
        assert_eq!(cache.get("hardware"), Lookup::Hit(3));
    }

    #[test]
    fn test_overwrite_restarts_window() {
        let (cache, clock) = cache_with_clock();
        cache.set("disk", 1, Ttl::from_secs(10));
        clock.advance(Duration::from_secs(9));
        cache.set("disk", 2, Ttl::from_secs(10));
        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("disk"), Lookup::Hit(2));
    }

    #[test]
    fn test_overwrite_replaces_never_with_finite() {
        let (cache, clock) = cache_with_clock();
        cache.set("battery", 1, Ttl::from_secs(-1));
        cache.set("battery", 2, Ttl::from_secs(1));
        clock.advance(Duration::from_secs(1));
        assert!(!cache.has("battery"));
    }

    #[test]
    fn test_remove_clears_entry() {
        let (cache, _clock) = cache_with_clock();
        cache.set("swap", 5, Ttl::from_secs(-1));
        assert_eq!(cache.remove("swap"), Some(5));
        assert!(!cache.has("swap"));
        assert!(cache.is_empty());
        assert_eq!(cache.remove("swap"), None);
    }

    #[test]
    fn test_stale_entries_stay_until_overwritten() {
        let (cache, clock) = cache_with_clock();
        cache.set("volts", 1, Ttl::from_secs(1));
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.len(), 1);
        assert!(!cache.has("volts"));
    }

    #[test]
    fn test_ttl_from_secs() {
        assert_eq!(Ttl::from_secs(-1), Ttl::Never);
        assert_eq!(Ttl::from_secs(-30), Ttl::Never);
        assert_eq!(Ttl::from_secs(5), Ttl::After(Duration::from_secs(5)));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let cache = Arc::new(TtlCache::<(u64, u64)>::new());
        cache.set("pair", (0, 0), Ttl::from_secs(-1));
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 1..=1000u64 {
                    cache.set("pair", (i, i), Ttl::from_secs(-1));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Lookup::Hit((a, b)) = cache.get("pair") {
                            assert_eq!(a, b);
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.get("pair"), Lookup::Hit((1000, 1000)));
    }
}
