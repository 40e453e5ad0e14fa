//! RAWG adapter for games.
//!
//! RAWG is the default game catalog: plain API-key auth, generous search,
//! and ratings already on a 0-5 scale so they pass through untouched.
//! Trending and new releases are expressed as date-window queries because
//! RAWG has no dedicated feeds.
//!
//! `reference_data` keys: `genres`, `platforms`, `metacritic`, `slug`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{lenient_item, malformed, MediaProvider};
use crate::cache::ResponseCache;
use crate::client::ProviderClient;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::media::{MediaKind, MediaRecord, NewsItem, SearchOptions, Source};

const SITE_BASE: &str = "https://rawg.io/games";
const TRENDING_WINDOW_DAYS: i64 = 90;
const RELEASE_WINDOW_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct GameEntry {
    id: u64,
    slug: Option<String>,
    name: Option<String>,
    released: Option<String>,
    background_image: Option<String>,
    rating: Option<f64>,
    ratings_count: Option<u64>,
    metacritic: Option<i64>,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    platforms: Vec<PlatformEntry>,
    // Only present on /games/{id}.
    description_raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlatformEntry {
    platform: Option<Named>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct RawgProvider {
    client: ProviderClient,
    api_key: Option<String>,
}

impl RawgProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client, cache: Arc<ResponseCache>) -> Self {
        Self {
            client: ProviderClient::new(http, cache, config),
            api_key: config.api_key.clone(),
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: Source::Rawg,
                message: "missing api key".into(),
            })
    }

    async fn fetch_listing(
        &self,
        extra: &[(&str, &str)],
        limit: usize,
    ) -> Result<Vec<GameEntry>, ProviderError> {
        let key = self.key()?;
        let page_size = limit.to_string();
        let mut params = vec![("key", key), ("page_size", page_size.as_str())];
        params.extend_from_slice(extra);
        let url = self.client.url("games", &params)?;
        let payload = self.client.get_json(url).await?;
        let page: Page = serde_json::from_value((*payload).clone())
            .map_err(|err| malformed(Source::Rawg, err))?;
        Ok(page
            .results
            .into_iter()
            .filter_map(|entry| lenient_item(Source::Rawg, entry))
            .collect())
    }

    fn record_from_entry(&self, entry: GameEntry) -> Option<MediaRecord> {
        let title = entry.name.filter(|name| !name.is_empty())?;
        let mut reference_data = Map::new();
        if !entry.genres.is_empty() {
            reference_data.insert(
                "genres".into(),
                Value::Array(entry.genres.iter().map(|g| json!(g.name)).collect()),
            );
        }
        let platforms: Vec<Value> = entry
            .platforms
            .iter()
            .filter_map(|p| p.platform.as_ref())
            .map(|p| json!(p.name))
            .collect();
        if !platforms.is_empty() {
            reference_data.insert("platforms".into(), Value::Array(platforms));
        }
        if let Some(metacritic) = entry.metacritic {
            reference_data.insert("metacritic".into(), json!(metacritic));
        }
        if let Some(slug) = &entry.slug {
            reference_data.insert("slug".into(), json!(slug));
        }
        let item_url = entry.slug.as_ref().map(|slug| format!("{SITE_BASE}/{slug}"));
        Some(MediaRecord {
            external_id: entry.id.to_string(),
            source: Source::Rawg,
            title,
            description: entry.description_raw.filter(|text| !text.is_empty()),
            kind: MediaKind::Game,
            release_date: entry.released.filter(|date| !date.is_empty()),
            cover_image: entry.background_image.filter(|url| !url.is_empty()),
            average_rating: entry.rating,
            total_reviews: entry.ratings_count,
            attribution: self.client.attribution(item_url),
            reference_data,
        })
    }
}

#[async_trait]
impl MediaProvider for RawgProvider {
    fn source(&self) -> Source {
        Source::Rawg
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError> {
        debug!(query, "RAWG search");
        let page = options.page_or_first().to_string();
        let entries = self
            .fetch_listing(
                &[("search", query), ("page", &page)],
                options.limit_or(20) as usize,
            )
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| self.record_from_entry(entry))
            .collect())
    }

    async fn details(
        &self,
        id: &str,
        _kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError> {
        let key = self.key()?;
        let url = self.client.url(&format!("games/{id}"), &[("key", key)])?;
        let payload = self.client.get_json(url).await?;
        let entry: GameEntry = serde_json::from_value((*payload).clone())
            .map_err(|err| malformed(Source::Rawg, err))?;
        self.record_from_entry(entry)
            .ok_or_else(|| malformed(Source::Rawg, "game entry without a name"))
    }

    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let window = date_window(TRENDING_WINDOW_DAYS);
        let entries = self
            .fetch_listing(&[("dates", &window), ("ordering", "-added")], limit)
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| self.record_from_entry(entry))
            .collect())
    }

    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let entries = self
            .fetch_listing(&[("ordering", "-metacritic")], limit)
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| self.record_from_entry(entry))
            .collect())
    }

    async fn new_releases(&self, limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        let window = date_window(RELEASE_WINDOW_DAYS);
        let entries = self
            .fetch_listing(&[("dates", &window), ("ordering", "-released")], limit)
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let title = entry.name.filter(|name| !name.is_empty())?;
                let url = entry
                    .slug
                    .map(|slug| format!("{SITE_BASE}/{slug}"))
                    .unwrap_or_else(|| Source::Rawg.homepage().to_string());
                Some(NewsItem {
                    title,
                    url,
                    source: Source::Rawg,
                    date: entry.released.filter(|date| !date.is_empty()),
                    description: None,
                    image: entry.background_image.filter(|u| !u.is_empty()),
                })
            })
            .take(limit)
            .collect())
    }
}

/// `start,end` date range ending today, as RAWG's `dates` filter expects.
/// Day resolution keeps the URL stable for a whole day of cache lookups.
fn date_window(days_back: i64) -> String {
    let today = Utc::now().date_naive();
    let start = today - ChronoDuration::days(days_back);
    format!("{start},{today}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RawgProvider {
        let mut config = ProviderConfig::defaults_for(Source::Rawg);
        config.api_key = Some("test-key".into());
        RawgProvider::new(
            &config,
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
        )
    }

    fn entry(value: Value) -> GameEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn ratings_pass_through_on_native_scale() {
        let record = provider()
            .record_from_entry(entry(json!({
                "id": 3498,
                "slug": "grand-theft-auto-v",
                "name": "Grand Theft Auto V",
                "released": "2013-09-17",
                "rating": 4.47,
                "ratings_count": 6010,
                "metacritic": 92
            })))
            .unwrap();
        assert_eq!(record.average_rating, Some(4.47));
        assert_eq!(record.total_reviews, Some(6010));
        assert_eq!(record.reference_data["metacritic"], json!(92));
        assert_eq!(
            record.attribution.source_url,
            "https://rawg.io/games/grand-theft-auto-v"
        );
    }

    #[test]
    fn nested_platform_wrappers_flatten() {
        let record = provider()
            .record_from_entry(entry(json!({
                "id": 1,
                "name": "Celeste",
                "platforms": [
                    {"platform": {"id": 4, "name": "PC"}},
                    {"platform": null},
                    {"platform": {"id": 7, "name": "Nintendo Switch"}}
                ]
            })))
            .unwrap();
        assert_eq!(
            record.reference_data["platforms"],
            json!(["PC", "Nintendo Switch"])
        );
    }

    #[test]
    fn slugless_entries_fall_back_to_homepage() {
        let record = provider()
            .record_from_entry(entry(json!({"id": 2, "name": "Mystery Game"})))
            .unwrap();
        assert_eq!(record.attribution.source_url, "https://rawg.io");
        assert!(record.reference_data.get("slug").is_none());
    }

    #[test]
    fn date_window_is_inclusive_and_ordered() {
        let window = date_window(30);
        let (start, end) = window.split_once(',').unwrap();
        assert!(start < end);
        assert_eq!(start.len(), 10);
        assert_eq!(end.len(), 10);
    }

    #[test]
    fn detail_description_is_kept() {
        let record = provider()
            .record_from_entry(entry(json!({
                "id": 7,
                "name": "Hades",
                "description_raw": "A rogue-like dungeon crawler."
            })))
            .unwrap();
        assert_eq!(
            record.description.as_deref(),
            Some("A rogue-like dungeon crawler.")
        );
    }
}
