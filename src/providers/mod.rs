//! Provider adapters for external metadata services.
//!
//! This module defines the [`MediaProvider`] trait that all metadata
//! backends (TMDB, IGDB, RAWG, Google Books, Last.fm, Comic Vine) must
//! implement. Each adapter wraps a single external API behind a
//! [`crate::client::ProviderClient`] and normalizes its payloads into
//! [`MediaRecord`] values, so callers never see an upstream schema.

pub mod comic_vine;
pub mod google_books;
pub mod igdb;
pub mod lastfm;
pub mod rawg;
pub mod tmdb;

pub use comic_vine::ComicVineProvider;
pub use google_books::GoogleBooksProvider;
pub use igdb::IgdbProvider;
pub use lastfm::LastfmProvider;
pub use rawg::RawgProvider;
pub use tmdb::TmdbProvider;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::ProviderError;
use crate::media::{MediaKind, MediaRecord, NewsItem, SearchOptions, Source};

/// Decodes one list item, skipping it (with a trace) when the upstream
/// shape does not line up. A single broken item must never fail a page.
pub(crate) fn lenient_item<T: DeserializeOwned>(source: Source, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(item) => Some(item),
        Err(err) => {
            trace!(provider = %source, error = %err, "skipping undecodable item");
            None
        }
    }
}

/// Maps a payload-level decode failure to [`ProviderError::Malformed`].
pub(crate) fn malformed(source: Source, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::Malformed {
        provider: source,
        message: err.to_string(),
    }
}

/// Async trait that all provider adapters must implement.
///
/// Adapters are expected to be wrapped in an `Arc` and shared across
/// tasks. All methods go through the adapter's rate limiter and response
/// cache, so calling them in a tight loop is safe, just slow.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Which external service this adapter wraps.
    fn source(&self) -> Source;

    /// Returns `true` when the adapter has the credentials it needs.
    /// Unconfigured adapters are skipped by aggregate operations.
    fn is_configured(&self) -> bool;

    /// Search the provider's catalog. Results carry the provider's native
    /// ranking; cross-provider ordering is the aggregator's job.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError>;

    /// Fetch one item by its provider-local id.
    ///
    /// `kind` disambiguates for providers whose ids are scoped per media
    /// type (TMDB movie vs TV ids overlap); single-catalog providers
    /// ignore it.
    async fn details(
        &self,
        id: &str,
        kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError>;

    /// What is currently gaining attention on the provider.
    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError>;

    /// All-time or long-window popularity, as the provider defines it.
    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError>;

    /// Recent and upcoming releases. Providers without a usable feed keep
    /// the default empty implementation.
    async fn new_releases(&self, _limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        Ok(Vec::new())
    }

    /// News-style items (theatrical openings, fresh issues). Most
    /// providers have no such feed and keep the default.
    async fn latest_news(&self, _limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        Ok(Vec::new())
    }
}
