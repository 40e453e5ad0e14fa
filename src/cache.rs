//! TTL response cache for upstream provider payloads.
//!
//! Raw JSON responses are cached before normalization, keyed by provider
//! tag plus request URL (plus body for POST queries). Expiry is lazy: an
//! entry past its TTL is treated as absent and removed on the read that
//! finds it, there is no sweeper task. Each provider also has an entry cap
//! so an unbounded query stream cannot grow the map without limit; when the
//! cap is hit the oldest entry for that provider is evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::media::Source;

pub const DEFAULT_MAX_ENTRIES: usize = 512;

/// Per-provider caching rules.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// `None` disables caching for the provider entirely. IGDB runs with
    /// caching disabled; every call goes upstream.
    pub ttl: Option<Duration>,
    pub max_entries: usize,
}

impl CachePolicy {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn disabled() -> Self {
        Self {
            ttl: None,
            max_entries: 0,
        }
    }
}

struct CacheEntry {
    data: Arc<Value>,
    stored_at: Instant,
    source: Source,
}

/// Shared response cache, one instance for the whole aggregation layer.
///
/// Values are held behind `Arc` so a hit hands out a cheap clone of the
/// pointer, never a deep copy of the payload.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    policies: HashMap<Source, CachePolicy>,
}

impl ResponseCache {
    pub fn new(policies: HashMap<Source, CachePolicy>) -> Self {
        Self {
            entries: DashMap::new(),
            policies,
        }
    }

    /// Cache with every provider's documented default TTL.
    pub fn with_default_policies() -> Self {
        let mut policies = HashMap::new();
        for source in Source::ALL {
            policies.insert(source, default_policy(source));
        }
        Self::new(policies)
    }

    /// Returns the cached payload for `key` unless it is missing, expired
    /// or the provider's cache is disabled. Expired entries are removed on
    /// the way out.
    pub fn get(&self, key: &str, source: Source) -> Option<Arc<Value>> {
        let ttl = self.policy(source).ttl?;
        let full_key = entry_key(source, key);
        let expired = match self.entries.get(&full_key) {
            Some(entry) => {
                if entry.stored_at.elapsed() <= ttl {
                    trace!(provider = %source, key, "cache hit");
                    return Some(Arc::clone(&entry.data));
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(&full_key);
            trace!(provider = %source, key, "cache entry expired");
        }
        None
    }

    /// Stores `data` under `key`, evicting the provider's oldest entry
    /// first if its cap is reached. Returns the stored payload so callers
    /// can keep serving it without another lookup. When the provider's
    /// cache is disabled nothing is stored and the payload is handed
    /// straight back.
    pub fn set(&self, key: &str, data: Value, source: Source) -> Arc<Value> {
        let data = Arc::new(data);
        let policy = self.policy(source);
        if policy.ttl.is_none() {
            return data;
        }
        let full_key = entry_key(source, key);
        if !self.entries.contains_key(&full_key) && self.count_for(source) >= policy.max_entries {
            self.evict_oldest(source);
        }
        self.entries.insert(
            full_key,
            CacheEntry {
                data: Arc::clone(&data),
                stored_at: Instant::now(),
                source,
            },
        );
        data
    }

    /// Drops all entries for one provider, or everything when `source` is
    /// `None`.
    pub fn clear(&self, source: Option<Source>) {
        match source {
            Some(source) => {
                self.entries.retain(|_, entry| entry.source != source);
                debug!(provider = %source, "cleared provider cache");
            }
            None => {
                self.entries.clear();
                debug!("cleared response cache");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn policy(&self, source: Source) -> CachePolicy {
        self.policies
            .get(&source)
            .copied()
            .unwrap_or_else(|| default_policy(source))
    }

    fn count_for(&self, source: Source) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.source == source)
            .count()
    }

    fn evict_oldest(&self, source: Source) {
        let oldest = self
            .entries
            .iter()
            .filter(|entry| entry.source == source)
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            debug!(provider = %source, "evicted oldest cache entry at capacity");
        }
    }
}

fn entry_key(source: Source, key: &str) -> String {
    format!("{}:{key}", source.tag())
}

/// Documented default TTL per provider. Volatility drives the numbers:
/// movie and game catalogs change daily, book metadata is close to
/// immutable, music charts churn hourly.
pub fn default_policy(source: Source) -> CachePolicy {
    match source {
        Source::Tmdb => CachePolicy::with_ttl(Duration::from_secs(86_400)),
        Source::Igdb => CachePolicy::disabled(),
        Source::Rawg => CachePolicy::with_ttl(Duration::from_secs(86_400)),
        Source::GoogleBooks => CachePolicy::with_ttl(Duration::from_secs(604_800)),
        Source::Lastfm => CachePolicy::with_ttl(Duration::from_secs(3_600)),
        Source::ComicVine => CachePolicy::with_ttl(Duration::from_secs(86_400)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(source: Source, policy: CachePolicy) -> ResponseCache {
        let mut policies = HashMap::new();
        policies.insert(source, policy);
        ResponseCache::new(policies)
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = cache_with(
            Source::Tmdb,
            CachePolicy::with_ttl(Duration::from_secs(60)),
        );
        cache.set("search?q=dune", json!({"page": 1}), Source::Tmdb);
        assert!(cache.get("search?q=dune", Source::Tmdb).is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("search?q=dune", Source::Tmdb).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("search?q=dune", Source::Tmdb).is_none());
        // The expired entry was evicted, not just hidden.
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn long_ttls_survive_long_gaps() {
        let cache = ResponseCache::with_default_policies();
        cache.set("volumes?q=dune", json!({"items": []}), Source::GoogleBooks);
        tokio::time::advance(Duration::from_secs(6 * 86_400)).await;
        assert!(cache.get("volumes?q=dune", Source::GoogleBooks).is_some());
        tokio::time::advance(Duration::from_secs(2 * 86_400)).await;
        assert!(cache.get("volumes?q=dune", Source::GoogleBooks).is_none());
    }

    #[test]
    fn disabled_provider_never_caches() {
        let cache = ResponseCache::with_default_policies();
        cache.set("games", json!({"id": 1}), Source::Igdb);
        assert!(cache.get("games", Source::Igdb).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn same_key_is_isolated_per_provider() {
        let cache = ResponseCache::with_default_policies();
        cache.set("search?q=dune", json!({"from": "tmdb"}), Source::Tmdb);
        cache.set("search?q=dune", json!({"from": "rawg"}), Source::Rawg);
        let tmdb = cache.get("search?q=dune", Source::Tmdb).unwrap();
        let rawg = cache.get("search?q=dune", Source::Rawg).unwrap();
        assert_eq!(tmdb["from"], "tmdb");
        assert_eq!(rawg["from"], "rawg");
    }

    #[test]
    fn clear_scopes_to_one_provider() {
        let cache = ResponseCache::with_default_policies();
        cache.set("a", json!(1), Source::Tmdb);
        cache.set("b", json!(2), Source::Rawg);
        cache.clear(Some(Source::Tmdb));
        assert!(cache.get("a", Source::Tmdb).is_none());
        assert!(cache.get("b", Source::Rawg).is_some());
        cache.clear(None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_the_oldest_entry() {
        let cache = cache_with(
            Source::Tmdb,
            CachePolicy {
                ttl: Some(Duration::from_secs(3_600)),
                max_entries: 2,
            },
        );
        cache.set("first", json!(1), Source::Tmdb);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set("second", json!(2), Source::Tmdb);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set("third", json!(3), Source::Tmdb);

        assert!(cache.get("first", Source::Tmdb).is_none());
        assert!(cache.get("second", Source::Tmdb).is_some());
        assert!(cache.get("third", Source::Tmdb).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overwriting_a_key_does_not_evict_neighbors() {
        let cache = cache_with(
            Source::Tmdb,
            CachePolicy {
                ttl: Some(Duration::from_secs(3_600)),
                max_entries: 2,
            },
        );
        cache.set("a", json!(1), Source::Tmdb);
        cache.set("b", json!(2), Source::Tmdb);
        cache.set("a", json!(3), Source::Tmdb);
        assert_eq!(cache.len(), 2);
        assert_eq!(*cache.get("a", Source::Tmdb).unwrap(), json!(3));
        assert!(cache.get("b", Source::Tmdb).is_some());
    }
}
