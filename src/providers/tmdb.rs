//! TMDB adapter for movies and TV shows.
//!
//! One adapter covers both kinds: multi-search and the trending feed tag
//! each item with a `media_type`, and `details` picks the movie or TV
//! endpoint from the caller's kind hint (ids overlap between the two
//! catalogs). Ratings stay on TMDB's native 0-10 scale.
//!
//! `reference_data` keys: `genres`, `cast` (top billed, name + character),
//! `runtime_minutes` / `seasons` / `episodes`, `imdb_id`, `popularity`,
//! `original_language`.

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

const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";
const SITE_BASE: &str = "https://www.themoviedb.org";
const CAST_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<Value>,
}

/// Union of the fields in multi-search, trending and the movie/TV listing
/// feeds. Movies carry `title`/`release_date`, shows `name`/
/// `first_air_date`; listings omit `media_type`.
#[derive(Debug, Deserialize)]
struct ListedItem {
    id: u64,
    media_type: Option<String>,
    title: Option<String>,
    name: Option<String>,
    overview: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
    popularity: Option<f64>,
    original_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MovieDetail {
    id: u64,
    title: Option<String>,
    overview: Option<String>,
    release_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
    #[serde(default)]
    genres: Vec<Genre>,
    runtime: Option<u32>,
    imdb_id: Option<String>,
    popularity: Option<f64>,
    original_language: Option<String>,
    credits: Option<Credits>,
}

#[derive(Debug, Deserialize)]
struct TvDetail {
    id: u64,
    name: Option<String>,
    overview: Option<String>,
    first_air_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
    #[serde(default)]
    genres: Vec<Genre>,
    number_of_seasons: Option<u32>,
    number_of_episodes: Option<u32>,
    popularity: Option<f64>,
    original_language: Option<String>,
    credits: Option<Credits>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastMember>,
}

#[derive(Debug, Deserialize)]
struct CastMember {
    name: String,
    character: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct TmdbProvider {
    client: ProviderClient,
    api_key: Option<String>,
    language: Option<String>,
}

impl TmdbProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client, cache: Arc<ResponseCache>) -> Self {
        Self {
            client: ProviderClient::new(http, cache, config),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: Source::Tmdb,
                message: "missing api key".into(),
            })
    }

    async fn fetch_page(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<Vec<ListedItem>, ProviderError> {
        let key = self.key()?;
        let mut params = vec![("api_key", key)];
        params.extend_from_slice(extra);
        if let Some(language) = &self.language {
            params.push(("language", language));
        }
        let url = self.client.url(path, &params)?;
        let payload = self.client.get_json(url).await?;
        let page: Page = serde_json::from_value((*payload).clone())
            .map_err(|err| malformed(Source::Tmdb, err))?;
        Ok(page
            .results
            .into_iter()
            .filter_map(|item| lenient_item(Source::Tmdb, item))
            .collect())
    }

    /// Items from feeds that tag each entry with `media_type`.
    fn record_from_tagged(&self, item: ListedItem) -> Option<MediaRecord> {
        let kind = match item.media_type.as_deref() {
            Some("movie") => MediaKind::Movie,
            Some("tv") => MediaKind::TvShow,
            // People and anything TMDB adds later.
            _ => return None,
        };
        Some(self.record_from_listed(item, kind))
    }

    /// Items from single-catalog feeds (`movie/popular`, `tv/popular`),
    /// where the kind comes from the endpoint instead of the payload.
    fn record_from_listed(&self, item: ListedItem, kind: MediaKind) -> MediaRecord {
        let title = match kind {
            MediaKind::TvShow => item.name.or(item.title),
            _ => item.title.or(item.name),
        }
        .unwrap_or_default();
        let release_date = match kind {
            MediaKind::TvShow => item.first_air_date.or(item.release_date),
            _ => item.release_date.or(item.first_air_date),
        };
        let mut reference_data = Map::new();
        if let Some(popularity) = item.popularity {
            reference_data.insert("popularity".into(), json!(popularity));
        }
        if let Some(language) = item.original_language {
            reference_data.insert("original_language".into(), json!(language));
        }
        MediaRecord {
            external_id: item.id.to_string(),
            source: Source::Tmdb,
            title,
            description: item.overview.filter(|text| !text.is_empty()),
            kind,
            release_date: release_date.filter(|date| !date.is_empty()),
            cover_image: image_url(item.poster_path.as_deref()),
            average_rating: item.vote_average,
            total_reviews: item.vote_count,
            attribution: self.client.attribution(Some(item_url(kind, item.id))),
            reference_data,
        }
    }

    fn record_from_movie(&self, detail: MovieDetail) -> MediaRecord {
        let mut reference_data = Map::new();
        if !detail.genres.is_empty() {
            reference_data.insert("genres".into(), genre_names(&detail.genres));
        }
        if let Some(runtime) = detail.runtime {
            reference_data.insert("runtime_minutes".into(), json!(runtime));
        }
        if let Some(imdb_id) = &detail.imdb_id {
            reference_data.insert("imdb_id".into(), json!(imdb_id));
        }
        if let Some(popularity) = detail.popularity {
            reference_data.insert("popularity".into(), json!(popularity));
        }
        if let Some(language) = &detail.original_language {
            reference_data.insert("original_language".into(), json!(language));
        }
        if let Some(cast) = top_cast(detail.credits.as_ref()) {
            reference_data.insert("cast".into(), cast);
        }
        MediaRecord {
            external_id: detail.id.to_string(),
            source: Source::Tmdb,
            title: detail.title.unwrap_or_default(),
            description: detail.overview.filter(|text| !text.is_empty()),
            kind: MediaKind::Movie,
            release_date: detail.release_date.filter(|date| !date.is_empty()),
            cover_image: image_url(detail.poster_path.as_deref()),
            average_rating: detail.vote_average,
            total_reviews: detail.vote_count,
            attribution: self
                .client
                .attribution(Some(item_url(MediaKind::Movie, detail.id))),
            reference_data,
        }
    }

    fn record_from_tv(&self, detail: TvDetail) -> MediaRecord {
        let mut reference_data = Map::new();
        if !detail.genres.is_empty() {
            reference_data.insert("genres".into(), genre_names(&detail.genres));
        }
        if let Some(seasons) = detail.number_of_seasons {
            reference_data.insert("seasons".into(), json!(seasons));
        }
        if let Some(episodes) = detail.number_of_episodes {
            reference_data.insert("episodes".into(), json!(episodes));
        }
        if let Some(popularity) = detail.popularity {
            reference_data.insert("popularity".into(), json!(popularity));
        }
        if let Some(language) = &detail.original_language {
            reference_data.insert("original_language".into(), json!(language));
        }
        if let Some(cast) = top_cast(detail.credits.as_ref()) {
            reference_data.insert("cast".into(), cast);
        }
        MediaRecord {
            external_id: detail.id.to_string(),
            source: Source::Tmdb,
            title: detail.name.unwrap_or_default(),
            description: detail.overview.filter(|text| !text.is_empty()),
            kind: MediaKind::TvShow,
            release_date: detail.first_air_date.filter(|date| !date.is_empty()),
            cover_image: image_url(detail.poster_path.as_deref()),
            average_rating: detail.vote_average,
            total_reviews: detail.vote_count,
            attribution: self
                .client
                .attribution(Some(item_url(MediaKind::TvShow, detail.id))),
            reference_data,
        }
    }

    fn news_from_listed(&self, items: Vec<ListedItem>, limit: usize) -> Vec<NewsItem> {
        items
            .into_iter()
            .map(|item| NewsItem {
                url: item_url(MediaKind::Movie, item.id),
                title: item.title.or(item.name).unwrap_or_default(),
                source: Source::Tmdb,
                date: item.release_date.filter(|date| !date.is_empty()),
                description: item.overview.filter(|text| !text.is_empty()),
                image: image_url(item.poster_path.as_deref()),
            })
            .take(limit)
            .collect()
    }
}

#[async_trait]
impl MediaProvider for TmdbProvider {
    fn source(&self) -> Source {
        Source::Tmdb
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError> {
        debug!(query, "TMDB multi search");
        let page = options.page_or_first().to_string();
        let items = self
            .fetch_page(
                "search/multi",
                &[("query", query), ("page", &page), ("include_adult", "false")],
            )
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| self.record_from_tagged(item))
            .take(options.limit_or(20) as usize)
            .collect())
    }

    async fn details(
        &self,
        id: &str,
        kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError> {
        let key = self.key()?;
        let path = match kind {
            Some(MediaKind::TvShow) => format!("tv/{id}"),
            _ => format!("movie/{id}"),
        };
        let mut params = vec![("api_key", key), ("append_to_response", "credits")];
        if let Some(language) = &self.language {
            params.push(("language", language));
        }
        let url = self.client.url(&path, &params)?;
        let payload = self.client.get_json(url).await?;
        match kind {
            Some(MediaKind::TvShow) => {
                let detail: TvDetail = serde_json::from_value((*payload).clone())
                    .map_err(|err| malformed(Source::Tmdb, err))?;
                Ok(self.record_from_tv(detail))
            }
            _ => {
                let detail: MovieDetail = serde_json::from_value((*payload).clone())
                    .map_err(|err| malformed(Source::Tmdb, err))?;
                Ok(self.record_from_movie(detail))
            }
        }
    }

    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let items = self.fetch_page("trending/all/week", &[]).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| self.record_from_tagged(item))
            .take(limit)
            .collect())
    }

    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let (movies, shows) = tokio::try_join!(
            self.fetch_page("movie/popular", &[]),
            self.fetch_page("tv/popular", &[])
        )?;
        let movies = movies
            .into_iter()
            .map(|item| self.record_from_listed(item, MediaKind::Movie));
        let shows = shows
            .into_iter()
            .map(|item| self.record_from_listed(item, MediaKind::TvShow));
        let mut merged = interleave(movies, shows);
        merged.truncate(limit);
        Ok(merged)
    }

    async fn new_releases(&self, limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        let items = self.fetch_page("movie/upcoming", &[]).await?;
        Ok(self.news_from_listed(items, limit))
    }

    async fn latest_news(&self, limit: usize) -> Result<Vec<NewsItem>, ProviderError> {
        let items = self.fetch_page("movie/now_playing", &[]).await?;
        Ok(self.news_from_listed(items, limit))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn image_url(path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{IMAGE_BASE}{p}"))
}

fn item_url(kind: MediaKind, id: u64) -> String {
    let segment = match kind {
        MediaKind::TvShow => "tv",
        _ => "movie",
    };
    format!("{SITE_BASE}/{segment}/{id}")
}

fn genre_names(genres: &[Genre]) -> Value {
    Value::Array(genres.iter().map(|g| json!(g.name)).collect())
}

fn top_cast(credits: Option<&Credits>) -> Option<Value> {
    let cast = &credits?.cast;
    if cast.is_empty() {
        return None;
    }
    Some(Value::Array(
        cast.iter()
            .take(CAST_LIMIT)
            .map(|member| json!({"name": member.name, "character": member.character}))
            .collect(),
    ))
}

/// Alternates items from two feeds so neither catalog dominates the head
/// of a merged listing.
fn interleave<T>(
    mut left: impl Iterator<Item = T>,
    mut right: impl Iterator<Item = T>,
) -> Vec<T> {
    let mut merged = Vec::new();
    loop {
        match (left.next(), right.next()) {
            (None, None) => break,
            (a, b) => {
                merged.extend(a);
                merged.extend(b);
            }
        }
    }
    merged
}
