//! Comic Vine adapter for comic volumes.
//!
//! Every response is wrapped in an envelope whose `status_code` must be 1;
//! anything else is an API-level failure even on HTTP 200. Volume detail
//! URLs take the `4050-` type prefix, but record ids stay bare numeric and
//! the prefix is applied (or stripped) here. Comic Vine rejects anonymous
//! clients, which is why the shared HTTP client always sends a user agent.
//! No community ratings exist, so `average_rating` is always `None`.
//!
//! `reference_data` keys: `publisher`, `issue_count`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{lenient_item, malformed, MediaProvider};
use crate::cache::ResponseCache;
use crate::client::ProviderClient;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::media::{MediaKind, MediaRecord, NewsItem, SearchOptions, Source};

/// Comic Vine resource type prefix for volumes.
const VOLUME_PREFIX: &str = "4050-";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    error: Option<String>,
    status_code: Option<i64>,
    results: Option<T>,
}

#[derive(Debug, Deserialize)]
struct VolumeEntry {
    id: u64,
    name: Option<String>,
    deck: Option<String>,
    image: Option<ImageSet>,
    /// Usually a string ("1952"), occasionally a number or null.
    start_year: Option<Value>,
    count_of_issues: Option<u64>,
    site_detail_url: Option<String>,
    publisher: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct IssueEntry {
    name: Option<String>,
    issue_number: Option<String>,
    volume: Option<Named>,
    store_date: Option<String>,
    cover_date: Option<String>,
    image: Option<ImageSet>,
    site_detail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageSet {
    medium_url: Option<String>,
    original_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct ComicVineProvider {
    client: ProviderClient,
    api_key: Option<String>,
}

impl ComicVineProvider {
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
                provider: Source::ComicVine,
                message: "missing api key".into(),
            })
    }

    async fn fetch_envelope(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<Value, ProviderError> {
        let key = self.key()?;
        let mut params = vec![("api_key", key), ("format", "json")];
        params.extend_from_slice(extra);
        let url = self.client.url(path, &params)?;
        let payload = self.client.get_json(url).await?;
        let envelope: Envelope<Value> = serde_json::from_value((*payload).clone())
            .map_err(|err| malformed(Source::ComicVine, err))?;
        if envelope.status_code != Some(1) {
            let detail = envelope.error.unwrap_or_else(|| "unknown error".into());
            return Err(ProviderError::Malformed {
                provider: Source::ComicVine,
                message: format!(
                    "api status {}: {detail}",
                    envelope
                        .status_code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "missing".into())
                ),
            });
        }
        envelope
            .results
            .ok_or_else(|| malformed(Source::ComicVine, "envelope without results"))
    }

    async fn fetch_volumes(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<Vec<VolumeEntry>, ProviderError> {
        let results = self.fetch_envelope(path, extra).await?;
        let items = match results {
            Value::Array(items) => items,
            other => {
                return Err(malformed(
                    Source::ComicVine,
                    format!("expected result list, got {other}"),
                ))
            }
        };
        Ok(items
            .into_iter()
            .filter_map(|item| lenient_item(Source::ComicVine, item))
            .collect())
    }

    fn record_from_volume(&self, volume: VolumeEntry) -> Option<MediaRecord> {
        let title = volume.name.filter(|name| !name.is_empty())?;
        let mut reference_data = Map::new();
        if let Some(publisher) = volume.publisher.and_then(|p| p.name) {
            reference_data.insert("publisher".into(), json!(publisher));
        }
        if let Some(issues) = volume.count_of_issues {
            reference_data.insert("issue_count".into(), json!(issues));
        }
        Some(MediaRecord {
            external_id: volume.id.to_string(),
            source: Source::ComicVine,
            title,
            description: volume.deck.filter(|text| !text.is_empty()),
            kind: MediaKind::Comic,
            release_date: volume.start_year.as_ref().and_then(year_string),
            cover_image: cover_url(volume.image.as_ref()),
            average_rating: None,
            total_reviews: None,
            attribution: self
                .client
                .attribution(volume.site_detail_url.filter(|u| !u.is_empty())),
            reference_data,
        })
    }
}

#[async_trait]
impl MediaProvider for ComicVineProvider {
    fn source(&self) -> Source {
        Source::ComicVine
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError> {
        debug!(query, "Comic Vine volume search");
        let limit = options.limit_or(20).to_string();
        let page = options.page_or_first().to_string();
        let volumes = self
            .fetch_volumes(
                "search/",
                &[
                    ("resources", "volume"),
                    ("query", query),
                    ("limit", &limit),
                    ("page", &page),
                ],
            )
            .await?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| self.record_from_volume(volume))
            .collect())
    }

    async fn details(
        &self,
        id: &str,
        _kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError> {
        let bare = id.strip_prefix(VOLUME_PREFIX).unwrap_or(id);
        let numeric: u64 = bare.parse().map_err(|_| ProviderError::Malformed {
            provider: Source::ComicVine,
            message: format!("volume id must be numeric, got {id:?}"),
        })?;
        let results = self
            .fetch_envelope(&format!("volume/{VOLUME_PREFIX}{numeric}/"), &[])
            .await?;
        let volume: VolumeEntry = serde_json::from_value(results)
            .map_err(|err| malformed(Source::ComicVine, err))?;
        self.record_from_volume(volume)
            .ok_or_else(|| malformed(Source::ComicVine, "volume without a name"))
    }

    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let limit_param = limit.to_string();
        let volumes = self
            .fetch_volumes(
                "volumes/",
                &[
                    ("sort", "date_last_updated:desc"),
                    ("limit", &limit_param),
                ],
            )
            .await?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| self.record_from_volume(volume))
            .collect())
    }

    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let limit_param = limit.to_string();
        let volumes = self
            .fetch_volumes(
                "volumes/",
                &[("sort", "count_of_issues:desc"), ("limit", &limit_param)],
            )
            .await?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| self.record_from_volume(volume))
            .collect())
    }

    async fn new_releases(&self, limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        let limit_param = limit.to_string();
        let results = self
            .fetch_envelope(
                "issues/",
                &[("sort", "store_date:desc"), ("limit", &limit_param)],
            )
            .await?;
        let items = match results {
            Value::Array(items) => items,
            _ => return Ok(Vec::new()),
        };
        Ok(items
            .into_iter()
            .filter_map(|item| lenient_item::<IssueEntry>(Source::ComicVine, item))
            .filter_map(|issue| {
                let title = issue_title(&issue)?;
                Some(NewsItem {
                    title,
                    url: issue
                        .site_detail_url
                        .filter(|u| !u.is_empty())
                        .unwrap_or_else(|| Source::ComicVine.homepage().to_string()),
                    source: Source::ComicVine,
                    date: issue.store_date.or(issue.cover_date),
                    description: None,
                    image: cover_url(issue.image.as_ref()),
                })
            })
            .take(limit)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Normalization helpers
// ---------------------------------------------------------------------------

fn cover_url(image: Option<&ImageSet>) -> Option<String> {
    let image = image?;
    image
        .medium_url
        .as_deref()
        .or(image.original_url.as_deref())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn year_string(value: &Value) -> Option<String> {
    match value {
        Value::String(year) if !year.trim().is_empty() => Some(year.trim().to_string()),
        Value::Number(year) => Some(year.to_string()),
        _ => None,
    }
}

/// Issues are often unnamed; fall back to "Volume #number".
fn issue_title(issue: &IssueEntry) -> Option<String> {
    if let Some(name) = issue.name.as_deref().filter(|name| !name.is_empty()) {
        return Some(name.to_string());
    }
    let volume = issue
        .volume
        .as_ref()
        .and_then(|v| v.name.as_deref())
        .filter(|name| !name.is_empty())?;
    match issue.issue_number.as_deref().filter(|n| !n.is_empty()) {
        Some(number) => Some(format!("{volume} #{number}")),
        None => Some(volume.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ComicVineProvider {
        let mut config = ProviderConfig::defaults_for(Source::ComicVine);
        config.api_key = Some("test-key".into());
        ComicVineProvider::new(
            &config,
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
        )
    }

    fn volume(value: Value) -> VolumeEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn volumes_normalize_with_bare_numeric_ids() {
        let record = provider()
            .record_from_volume(volume(json!({
                "id": 796,
                "name": "Batman",
                "deck": "The Dark Knight of Gotham City.",
                "start_year": "1940",
                "count_of_issues": 716,
                "site_detail_url": "https://comicvine.gamespot.com/batman/4050-796/",
                "publisher": {"name": "DC Comics"}
            })))
            .unwrap();
        assert_eq!(record.external_id, "796");
        assert_eq!(record.kind, MediaKind::Comic);
        assert_eq!(record.release_date.as_deref(), Some("1940"));
        assert_eq!(record.reference_data["publisher"], json!("DC Comics"));
        assert_eq!(record.reference_data["issue_count"], json!(716));
        assert!(record.average_rating.is_none());
    }

    #[test]
    fn numeric_start_years_are_tolerated() {
        assert_eq!(year_string(&json!(1986)).as_deref(), Some("1986"));
        assert_eq!(year_string(&json!("  ")), None);
        assert_eq!(year_string(&json!(null)), None);
    }

    #[test]
    fn deck_beats_missing_description() {
        let record = provider()
            .record_from_volume(volume(json!({"id": 1, "name": "Saga", "deck": ""})))
            .unwrap();
        assert!(record.description.is_none());
    }

    #[test]
    fn medium_image_preferred_over_original() {
        let image: ImageSet = serde_json::from_value(json!({
            "medium_url": "https://cv/medium.jpg",
            "original_url": "https://cv/original.jpg"
        }))
        .unwrap();
        assert_eq!(cover_url(Some(&image)).as_deref(), Some("https://cv/medium.jpg"));
    }

    #[test]
    fn unnamed_issues_title_from_volume_and_number() {
        let issue: IssueEntry = serde_json::from_value(json!({
            "issue_number": "424",
            "volume": {"name": "The Amazing Spider-Man"},
            "store_date": "2025-07-02"
        }))
        .unwrap();
        assert_eq!(
            issue_title(&issue).as_deref(),
            Some("The Amazing Spider-Man #424")
        );
    }

    #[test]
    fn envelope_failures_carry_the_api_message() {
        let envelope: Envelope<Value> = serde_json::from_value(json!({
            "error": "Invalid API Key",
            "status_code": 100,
            "results": []
        }))
        .unwrap();
        assert_eq!(envelope.status_code, Some(100));
        assert_eq!(envelope.error.as_deref(), Some("Invalid API Key"));
    }
}
