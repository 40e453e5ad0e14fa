//! Google Books adapter.
//!
//! Works with or without an API key (a key only raises the quota), so this
//! adapter always reports itself configured. Google's 0-5 `averageRating`
//! is doubled onto the catalog's 0-10 scale, thumbnail links are upgraded
//! to https, and partial publication dates ("2021", "2021-10") are kept
//! as-is.
//!
//! `reference_data` keys: `authors`, `publisher`, `categories`,
//! `page_count`, `language`.

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

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VolumesPage {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    id: String,
    #[serde(rename = "volumeInfo")]
    volume_info: Option<VolumeInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    average_rating: Option<f64>,
    ratings_count: Option<u64>,
    image_links: Option<ImageLinks>,
    info_link: Option<String>,
    page_count: Option<u32>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    thumbnail: Option<String>,
    small_thumbnail: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct GoogleBooksProvider {
    client: ProviderClient,
    api_key: Option<String>,
}

impl GoogleBooksProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client, cache: Arc<ResponseCache>) -> Self {
        Self {
            client: ProviderClient::new(http, cache, config),
            api_key: config.api_key.clone(),
        }
    }

    async fn fetch_volumes(
        &self,
        query: &str,
        options: &SearchOptions,
        order_by: Option<&str>,
    ) -> Result<Vec<Volume>, ProviderError> {
        let (limit, start) = paging(options);
        let limit = limit.to_string();
        let start = start.to_string();
        let mut params = vec![
            ("q", query),
            ("maxResults", limit.as_str()),
            ("startIndex", start.as_str()),
            ("printType", "books"),
        ];
        if let Some(order) = order_by {
            params.push(("orderBy", order));
        }
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            params.push(("key", key));
        }
        let url = self.client.url("volumes", &params)?;
        let payload = self.client.get_json(url).await?;
        let page: VolumesPage = serde_json::from_value((*payload).clone())
            .map_err(|err| malformed(Source::GoogleBooks, err))?;
        Ok(page
            .items
            .into_iter()
            .filter_map(|item| lenient_item(Source::GoogleBooks, item))
            .collect())
    }

    fn record_from_volume(&self, volume: Volume) -> Option<MediaRecord> {
        let info = volume.volume_info.unwrap_or_default();
        let title = info.title.filter(|title| !title.is_empty())?;
        let title = match &info.subtitle {
            Some(subtitle) if !subtitle.is_empty() => format!("{title}: {subtitle}"),
            _ => title,
        };
        let mut reference_data = Map::new();
        if !info.authors.is_empty() {
            reference_data.insert("authors".into(), json!(info.authors));
        }
        if let Some(publisher) = &info.publisher {
            reference_data.insert("publisher".into(), json!(publisher));
        }
        if !info.categories.is_empty() {
            reference_data.insert("categories".into(), json!(info.categories));
        }
        if let Some(pages) = info.page_count {
            reference_data.insert("page_count".into(), json!(pages));
        }
        if let Some(language) = &info.language {
            reference_data.insert("language".into(), json!(language));
        }
        Some(MediaRecord {
            external_id: volume.id,
            source: Source::GoogleBooks,
            title,
            description: info.description.filter(|text| !text.is_empty()),
            kind: MediaKind::Book,
            release_date: info.published_date.filter(|date| !date.is_empty()),
            cover_image: cover_from_links(info.image_links.as_ref()),
            // Google rates 0-5; the catalog scale for books is 0-10.
            average_rating: info.average_rating.map(|rating| rating * 2.0),
            total_reviews: info.ratings_count,
            attribution: self.client.attribution(info.info_link),
            reference_data,
        })
    }
}

#[async_trait]
impl MediaProvider for GoogleBooksProvider {
    fn source(&self) -> Source {
        Source::GoogleBooks
    }

    /// Keyless access works at a reduced quota, so this adapter is always
    /// usable.
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError> {
        debug!(query, "Google Books search");
        let volumes = self.fetch_volumes(query, options, None).await?;
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
        let mut params = Vec::new();
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            params.push(("key", key));
        }
        let url = self.client.url(&format!("volumes/{id}"), &params)?;
        let payload = self.client.get_json(url).await?;
        let volume: Volume = serde_json::from_value((*payload).clone())
            .map_err(|err| malformed(Source::GoogleBooks, err))?;
        self.record_from_volume(volume)
            .ok_or_else(|| malformed(Source::GoogleBooks, "volume without a title"))
    }

    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let options = SearchOptions {
            page: None,
            limit: Some(limit as u32),
        };
        let volumes = self
            .fetch_volumes("subject:fiction", &options, Some("newest"))
            .await?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| self.record_from_volume(volume))
            .collect())
    }

    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let options = SearchOptions {
            page: None,
            limit: Some(limit as u32),
        };
        let volumes = self.fetch_volumes("bestseller", &options, None).await?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| self.record_from_volume(volume))
            .collect())
    }

    async fn new_releases(&self, limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        let records = self.trending(limit).await?;
        Ok(records
            .into_iter()
            .map(|record| NewsItem {
                title: record.title,
                url: record.attribution.source_url,
                source: Source::GoogleBooks,
                date: record.release_date,
                description: record.description,
                image: record.cover_image,
            })
            .collect())
    }
}

/// Page size capped at Google's 40-per-request maximum; the start index
/// steps by the capped size, saturating on extreme page numbers.
fn paging(options: &SearchOptions) -> (u32, u32) {
    let limit = options.limit_or(20).min(40);
    let start = (options.page_or_first() - 1).saturating_mul(limit);
    (limit, start)
}

fn cover_from_links(links: Option<&ImageLinks>) -> Option<String> {
    let links = links?;
    let url = links
        .thumbnail
        .as_deref()
        .or(links.small_thumbnail.as_deref())
        .filter(|url| !url.is_empty())?;
    // Google hands out http links; serve them over https.
    Some(url.replacen("http://", "https://", 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GoogleBooksProvider {
        let config = ProviderConfig::defaults_for(Source::GoogleBooks);
        GoogleBooksProvider::new(
            &config,
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
        )
    }

    fn volume(value: Value) -> Volume {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn ratings_double_onto_ten_point_scale() {
        let record = provider()
            .record_from_volume(volume(json!({
                "id": "B1MsEAAAQBAJ",
                "volumeInfo": {
                    "title": "Dune",
                    "authors": ["Frank Herbert"],
                    "averageRating": 4.0,
                    "ratingsCount": 1520
                }
            })))
            .unwrap();
        assert_eq!(record.average_rating, Some(8.0));
        assert_eq!(record.total_reviews, Some(1520));
        assert_eq!(record.reference_data["authors"], json!(["Frank Herbert"]));
    }

    #[test]
    fn thumbnails_upgrade_to_https() {
        let record = provider()
            .record_from_volume(volume(json!({
                "id": "x",
                "volumeInfo": {
                    "title": "Mistborn",
                    "imageLinks": {
                        "thumbnail": "http://books.google.com/books/content?id=x&printsec=frontcover"
                    }
                }
            })))
            .unwrap();
        assert!(record.cover_image.unwrap().starts_with("https://"));
    }

    #[test]
    fn partial_publication_dates_are_kept() {
        let record = provider()
            .record_from_volume(volume(json!({
                "id": "y",
                "volumeInfo": {"title": "Hyperion", "publishedDate": "1989"}
            })))
            .unwrap();
        assert_eq!(record.release_date.as_deref(), Some("1989"));
    }

    #[test]
    fn subtitle_joins_the_title() {
        let record = provider()
            .record_from_volume(volume(json!({
                "id": "z",
                "volumeInfo": {
                    "title": "The Name of the Wind",
                    "subtitle": "The Kingkiller Chronicle: Day One",
                    "pageCount": 662,
                    "language": "en"
                }
            })))
            .unwrap();
        assert_eq!(
            record.title,
            "The Name of the Wind: The Kingkiller Chronicle: Day One"
        );
        assert_eq!(record.reference_data["page_count"], json!(662));
    }

    #[test]
    fn paging_steps_by_the_capped_page_size() {
        let options = SearchOptions {
            page: Some(3),
            limit: Some(100),
        };
        assert_eq!(paging(&options), (40, 80));

        let options = SearchOptions {
            page: Some(u32::MAX),
            limit: Some(40),
        };
        assert_eq!(paging(&options), (40, u32::MAX));

        assert_eq!(paging(&SearchOptions::default()), (20, 0));
    }

    #[test]
    fn volumes_without_info_are_skipped() {
        assert!(provider()
            .record_from_volume(volume(json!({"id": "bare"})))
            .is_none());
    }

    #[test]
    fn keyless_adapter_is_still_configured() {
        assert!(provider().is_configured());
    }
}
