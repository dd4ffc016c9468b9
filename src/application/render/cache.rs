//! Bounded artifact store keyed by fingerprint.
//!
//! Eviction is strict insertion order: reads never promote an entry and
//! overwriting an existing key keeps its original slot.

use std::num::NonZeroUsize;

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::fingerprint::Fingerprint;

pub const DEFAULT_CACHE_CAPACITY: usize = 20;

const METRIC_CACHE_HIT: &str = "ritratto_render_cache_hit_total";
const METRIC_CACHE_MISS: &str = "ritratto_render_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "ritratto_render_cache_evict_total";

pub struct RenderCache {
    entries: LruCache<Fingerprint, String>,
}

impl RenderCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&str> {
        match self.entries.peek(fingerprint) {
            Some(artifact) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(artifact.as_str())
            }
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
        }
    }

    /// Insert an artifact, returning the fingerprint evicted to make room.
    pub fn put(&mut self, fingerprint: Fingerprint, artifact: String) -> Option<Fingerprint> {
        if let Some(slot) = self.entries.peek_mut(&fingerprint) {
            *slot = artifact;
            return None;
        }

        let evicted = self
            .entries
            .push(fingerprint, artifact)
            .map(|(evicted, _)| evicted);
        if let Some(evicted) = evicted.as_ref() {
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(
                op = "render_cache::put",
                result = "evicted",
                fingerprint = %evicted,
                "Render cache evicted oldest entry"
            );
        }
        evicted
    }

    /// Drop a single entry so the next run for it bypasses the cache.
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> bool {
        self.entries.pop(fingerprint).is_some()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::types::{Dialect, RenderRequest, Theme};

    fn fp(n: usize) -> Fingerprint {
        Fingerprint::of(&RenderRequest::new(
            format!("A{n}->B"),
            Dialect::Mermaid,
            Theme::Default,
        ))
    }

    #[test]
    fn get_after_put_returns_artifact() {
        let mut cache = RenderCache::default();
        assert!(cache.get(&fp(1)).is_none());

        cache.put(fp(1), "<svg>1</svg>".to_string());
        assert_eq!(cache.get(&fp(1)), Some("<svg>1</svg>"));
    }

    #[test]
    fn inserting_past_capacity_evicts_oldest_inserted() {
        let mut cache = RenderCache::default();
        for n in 1..=20 {
            assert!(cache.put(fp(n), format!("{n}")).is_none());
        }

        let evicted = cache.put(fp(21), "21".to_string());
        assert_eq!(evicted, Some(fp(1)));
        assert_eq!(cache.len(), 20);
        assert!(!cache.contains(&fp(1)));
        for n in 2..=21 {
            assert!(cache.contains(&fp(n)), "entry {n} should remain");
        }
    }

    #[test]
    fn reads_do_not_change_eviction_order() {
        let mut cache = RenderCache::new(NonZeroUsize::new(2).expect("non-zero"));
        cache.put(fp(1), "1".to_string());
        cache.put(fp(2), "2".to_string());

        // An LRU would now keep entry 1; insertion order still evicts it.
        assert!(cache.get(&fp(1)).is_some());
        cache.put(fp(3), "3".to_string());

        assert!(!cache.contains(&fp(1)));
        assert!(cache.contains(&fp(2)));
        assert!(cache.contains(&fp(3)));
    }

    #[test]
    fn overwrite_keeps_original_slot() {
        let mut cache = RenderCache::new(NonZeroUsize::new(2).expect("non-zero"));
        cache.put(fp(1), "old".to_string());
        cache.put(fp(2), "2".to_string());
        assert!(cache.put(fp(1), "new".to_string()).is_none());
        assert_eq!(cache.get(&fp(1)), Some("new"));

        assert_eq!(cache.put(fp(3), "3".to_string()), Some(fp(1)));
    }

    #[test]
    fn remove_bypasses_single_entry() {
        let mut cache = RenderCache::default();
        cache.put(fp(1), "1".to_string());
        cache.put(fp(2), "2".to_string());

        assert!(cache.remove(&fp(1)));
        assert!(!cache.remove(&fp(1)));
        assert!(cache.contains(&fp(2)));
        assert_eq!(cache.len(), 1);
    }
}
