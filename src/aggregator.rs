//! Cross-provider aggregation.
//!
//! The [`Aggregator`] owns the registered provider adapters and exposes a
//! unified interface over all of them. Fan-out operations query every
//! relevant provider concurrently, treat each provider failure as an empty
//! contribution (one broken upstream never empties a feed), then merge,
//! deduplicate by `(source, external_id)` and sort by rating.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::ProviderError;
use crate::media::{MediaKind, MediaRecord, NewsItem, SearchOptions, Source};
use crate::providers::{
    ComicVineProvider, GoogleBooksProvider, IgdbProvider, LastfmProvider, MediaProvider,
    RawgProvider, TmdbProvider,
};

/// Which provider serves a media kind by default.
///
/// Games have two catalogs: RAWG answers kind-routed calls, IGDB stays
/// reachable for source-directed lookups and joins merged game searches.
pub fn route(kind: MediaKind) -> Source {
    match kind {
        MediaKind::Movie | MediaKind::TvShow => Source::Tmdb,
        MediaKind::Game => Source::Rawg,
        MediaKind::Book => Source::GoogleBooks,
        MediaKind::Music => Source::Lastfm,
        MediaKind::Comic => Source::ComicVine,
    }
}

/// Unique fan-out targets for a set of kinds, in first-mention order.
/// Movie and TV both map to TMDB, which must then be queried exactly once.
fn sources_for(kinds: &[MediaKind]) -> Vec<Source> {
    let kinds = if kinds.is_empty() { &MediaKind::ALL[..] } else { kinds };
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for kind in kinds {
        let mut targets = vec![route(*kind)];
        if *kind == MediaKind::Game {
            targets.push(Source::Igdb);
        }
        for target in targets {
            if seen.insert(target) {
                sources.push(target);
            }
        }
    }
    sources
}

/// Coordinates all registered providers. Providers are stored in
/// registration order, which fan-out operations preserve in their merged
/// output (before rating sort).
pub struct Aggregator {
    providers: Vec<Arc<dyn MediaProvider>>,
    cache: Arc<ResponseCache>,
}

impl Aggregator {
    /// Create an empty aggregator sharing `cache` with its providers.
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self {
            providers: Vec::new(),
            cache,
        }
    }

    /// Build the full six-provider aggregator from configuration. This is
    /// the composition root: the shared HTTP client, the response cache
    /// and every adapter are constructed here and nowhere else.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = config.http_client()?;
        let cache = Arc::new(ResponseCache::new(config.cache_policies()));
        let mut aggregator = Self::new(Arc::clone(&cache));

        aggregator.register(Arc::new(TmdbProvider::new(
            &config.provider(Source::Tmdb),
            http.clone(),
            Arc::clone(&cache),
        )));
        aggregator.register(Arc::new(IgdbProvider::new(
            &config.provider(Source::Igdb),
            http.clone(),
            Arc::clone(&cache),
        )));
        aggregator.register(Arc::new(RawgProvider::new(
            &config.provider(Source::Rawg),
            http.clone(),
            Arc::clone(&cache),
        )));
        aggregator.register(Arc::new(GoogleBooksProvider::new(
            &config.provider(Source::GoogleBooks),
            http.clone(),
            Arc::clone(&cache),
        )));
        aggregator.register(Arc::new(LastfmProvider::new(
            &config.provider(Source::Lastfm),
            http.clone(),
            Arc::clone(&cache),
        )));
        aggregator.register(Arc::new(ComicVineProvider::new(
            &config.provider(Source::ComicVine),
            http,
            Arc::clone(&cache),
        )));

        let configured: Vec<_> = aggregator
            .providers
            .iter()
            .filter(|p| p.is_configured())
            .map(|p| p.source().tag())
            .collect();
        info!(providers = ?configured, "aggregator ready");
        Ok(aggregator)
    }

    /// Register a provider. Registration order is merge order.
    pub fn register(&mut self, provider: Arc<dyn MediaProvider>) {
        self.providers.push(provider);
    }

    /// Look up a registered provider by source.
    pub fn provider(&self, source: Source) -> Option<&Arc<dyn MediaProvider>> {
        self.providers.iter().find(|p| p.source() == source)
    }

    pub fn providers(&self) -> &[Arc<dyn MediaProvider>] {
        &self.providers
    }

    /// Search the providers responsible for `kinds` (all of them when
    /// `kinds` is empty). Failures and unconfigured providers contribute
    /// nothing; the rest are merged, deduplicated and rating-sorted.
    pub async fn search(
        &self,
        query: &str,
        kinds: &[MediaKind],
        options: &SearchOptions,
    ) -> Vec<MediaRecord> {
        let sources = sources_for(kinds);
        let calls = self.select(&sources).map(|provider| async move {
            (provider.source(), provider.search(query, options).await)
        });
        let settled = join_all(calls).await;
        merge_records(settled, "search")
    }

    /// Search every configured provider.
    pub async fn search_all(&self, query: &str, options: &SearchOptions) -> Vec<MediaRecord> {
        self.search(query, &[], options).await
    }

    pub async fn trending(&self, kinds: &[MediaKind], limit: usize) -> Vec<MediaRecord> {
        let sources = sources_for(kinds);
        let calls = self.select(&sources).map(|provider| async move {
            (provider.source(), provider.trending(limit).await)
        });
        let settled = join_all(calls).await;
        merge_records(settled, "trending")
    }

    pub async fn popular(&self, kinds: &[MediaKind], limit: usize) -> Vec<MediaRecord> {
        let sources = sources_for(kinds);
        let calls = self.select(&sources).map(|provider| async move {
            (provider.source(), provider.popular(limit).await)
        });
        let settled = join_all(calls).await;
        merge_records(settled, "popular")
    }

    /// Fetch one item through its kind's default provider. Unlike the
    /// aggregate operations this propagates the provider error, status
    /// and all: a caller asking for one record needs to know why it is
    /// missing.
    pub async fn details(&self, kind: MediaKind, id: &str) -> Result<MediaRecord, ProviderError> {
        self.details_from(route(kind), id, Some(kind)).await
    }

    /// Fetch one item from an explicit provider, bypassing kind routing.
    pub async fn details_from(
        &self,
        source: Source,
        id: &str,
        kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError> {
        let provider = self
            .provider(source)
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: source,
                message: "provider not registered".into(),
            })?;
        provider.details(id, kind).await
    }

    /// New and upcoming releases across every configured provider, newest
    /// first.
    pub async fn new_releases(&self, limit: usize) -> Vec<NewsItem> {
        let calls = self.configured().map(|provider| async move {
            (provider.source(), provider.new_releases(limit).await)
        });
        let settled = join_all(calls).await;
        merge_news(settled, limit, "new_releases")
    }

    /// News-style items across every configured provider, newest first.
    pub async fn latest_news(&self, limit: usize) -> Vec<NewsItem> {
        let calls = self.configured().map(|provider| async move {
            (provider.source(), provider.latest_news(limit).await)
        });
        let settled = join_all(calls).await;
        merge_news(settled, limit, "latest_news")
    }

    /// Drop cached responses for one provider, or all of them.
    pub fn clear_cache(&self, source: Option<Source>) {
        self.cache.clear(source);
    }

    fn select<'a>(
        &'a self,
        sources: &'a [Source],
    ) -> impl Iterator<Item = &'a Arc<dyn MediaProvider>> + 'a {
        sources
            .iter()
            .filter_map(|source| self.provider(*source))
            .filter(|provider| provider.is_configured())
    }

    fn configured(&self) -> impl Iterator<Item = &Arc<dyn MediaProvider>> {
        self.providers.iter().filter(|p| p.is_configured())
    }
}

// ---------------------------------------------------------------------------
// Merge pipeline
// ---------------------------------------------------------------------------

fn merge_records(
    settled: Vec<(Source, Result<Vec<MediaRecord>, ProviderError>)>,
    operation: &str,
) -> Vec<MediaRecord> {
    let mut merged = Vec::new();
    for (source, result) in settled {
        match result {
            Ok(records) => merged.extend(records),
            Err(error) => {
                warn!(provider = %source, %error, operation, "provider failed, continuing without it");
            }
        }
    }
    dedup_by_identity(&mut merged);
    sort_by_rating(&mut merged);
    merged
}

fn merge_news(
    settled: Vec<(Source, Result<Vec<NewsItem>, ProviderError>)>,
    limit: usize,
    operation: &str,
) -> Vec<NewsItem> {
    let mut merged = Vec::new();
    for (source, result) in settled {
        match result {
            Ok(items) => merged.extend(items),
            Err(error) => {
                warn!(provider = %source, %error, operation, "provider failed, continuing without it");
            }
        }
    }
    // Newest first; undated items sink to the end.
    merged.sort_by(|a, b| b.date.cmp(&a.date));
    merged.truncate(limit);
    merged
}

/// Removes records sharing an identity, keeping the first occurrence in
/// place. `(source, external_id)` is the only trustworthy key; titles
/// collide across providers constantly.
pub(crate) fn dedup_by_identity(records: &mut Vec<MediaRecord>) {
    let mut seen = HashSet::new();
    records.retain(|record| seen.insert((record.source, record.external_id.clone())));
}

/// Rating-descending order with unrated records treated as 0. The sort is
/// stable, so same-rating records keep their merge order.
pub(crate) fn sort_by_rating(records: &mut [MediaRecord]) {
    records.sort_by(|a, b| {
        let left = b.average_rating.unwrap_or(0.0);
        let right = a.average_rating.unwrap_or(0.0);
        left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
    });
}
