//! Parsed-domain cache.
//!
//! Record rule domains are parsed once per snapshot generation and shared
//! across every evaluation. Entries remember the generation they were
//! parsed under; a lookup for a newer generation treats them as misses and
//! replaces them.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use rowguard_domain::{DomainExpr, ParseError};
use tracing::debug;

/// Cached domain with metadata.
#[derive(Debug)]
struct CachedDomain {
    domain: Arc<DomainExpr>,
    generation: u64,
    hit_count: AtomicU64,
}

impl CachedDomain {
    fn new(domain: Arc<DomainExpr>, generation: u64) -> Self {
        Self {
            domain,
            generation,
            hit_count: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Concurrent cache of parsed domains keyed by source text.
#[derive(Debug)]
pub struct DomainCache {
    entries: DashMap<String, CachedDomain>,
    max_entries: usize,
    stats: CacheStats,
}

impl DomainCache {
    /// Create a cache holding at most `max_entries` domains.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Return the parsed domain for `source`, parsing it on a miss.
    pub fn get_or_parse(&self, source: &str, generation: u64) -> Result<Arc<DomainExpr>, ParseError> {
        if let Some(cached) = self.entries.get(source) {
            if cached.generation == generation {
                cached.record_hit();
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                return Ok(Arc::clone(&cached.domain));
            }
        }

        self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
        let domain = Arc::new(rowguard_domain::parse(source)?);

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(source) {
            self.evict_least_used();
        }
        self.entries.insert(
            source.to_string(),
            CachedDomain::new(Arc::clone(&domain), generation),
        );
        Ok(domain)
    }

    /// Drop every entry parsed under a generation older than `generation`.
    pub fn invalidate_before(&self, generation: u64) {
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.generation >= generation);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!(generation, dropped, "invalidated stale domain cache entries");
        }
    }

    fn evict_least_used(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| (entry.generation, entry.hits()))
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the current number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for DomainCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
