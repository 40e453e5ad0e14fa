//! IGDB adapter for games, authenticated through Twitch.
//!
//! IGDB takes APICalypse queries as plain-text POST bodies against
//! `/games`, authorized with an app access token from the Twitch
//! client-credentials flow. Responses are never cached (the 0-100
//! `total_rating` is normalized to the catalog's 0-5 scale, release
//! timestamps are unix seconds, and cover URLs arrive protocol-relative
//! at thumbnail size; all of that happens here).
//!
//! `reference_data` keys: `genres`, `platforms`, `hypes`.

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
use crate::media::{MediaKind, MediaRecord, SearchOptions, Source};
use crate::oauth::ClientCredentials;

const GAME_FIELDS: &str = "name,summary,first_release_date,cover.url,total_rating,\
                           total_rating_count,genres.name,platforms.name,hypes,url";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Game {
    id: u64,
    name: Option<String>,
    summary: Option<String>,
    first_release_date: Option<i64>,
    cover: Option<Cover>,
    total_rating: Option<f64>,
    total_rating_count: Option<u64>,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    platforms: Vec<Named>,
    hypes: Option<u64>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cover {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct IgdbProvider {
    client: ProviderClient,
    auth: ClientCredentials,
}

impl IgdbProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client, cache: Arc<ResponseCache>) -> Self {
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| "https://id.twitch.tv/oauth2/token".to_string());
        Self {
            client: ProviderClient::new(http.clone(), cache, config),
            auth: ClientCredentials::new(
                http,
                token_url,
                config.client_id.clone().unwrap_or_default(),
                config.client_secret.clone().unwrap_or_default(),
                config.timeout,
            ),
        }
    }

    async fn query_games(&self, body: String) -> Result<Vec<MediaRecord>, ProviderError> {
        if !self.auth.is_configured() {
            return Err(ProviderError::NotConfigured {
                provider: Source::Igdb,
                message: "missing twitch client credentials".into(),
            });
        }
        let token = self.auth.bearer().await?;
        let headers = [
            ("Client-ID", self.auth.client_id().to_string()),
            ("Authorization", format!("Bearer {token}")),
        ];
        let url = self.client.url("games", &[])?;
        debug!(body = %body, "IGDB query");
        let payload = self.client.post_json(url, body, &headers).await?;
        let games = match &*payload {
            Value::Array(items) => items.clone(),
            other => {
                return Err(malformed(
                    Source::Igdb,
                    format!("expected array, got {other}"),
                ))
            }
        };
        Ok(games
            .into_iter()
            .filter_map(|game| lenient_item::<Game>(Source::Igdb, game))
            .filter_map(|game| self.record_from_game(game))
            .collect())
    }

    fn record_from_game(&self, game: Game) -> Option<MediaRecord> {
        let title = game.name.filter(|name| !name.is_empty())?;
        let mut reference_data = Map::new();
        if !game.genres.is_empty() {
            reference_data.insert("genres".into(), names(&game.genres));
        }
        if !game.platforms.is_empty() {
            reference_data.insert("platforms".into(), names(&game.platforms));
        }
        if let Some(hypes) = game.hypes {
            reference_data.insert("hypes".into(), json!(hypes));
        }
        Some(MediaRecord {
            external_id: game.id.to_string(),
            source: Source::Igdb,
            title,
            description: game.summary.filter(|text| !text.is_empty()),
            kind: MediaKind::Game,
            release_date: game.first_release_date.and_then(date_from_timestamp),
            cover_image: game.cover.and_then(|cover| cover_url(cover.url.as_deref())),
            average_rating: game.total_rating.map(|rating| rating / 20.0),
            total_reviews: game.total_rating_count,
            attribution: self.client.attribution(game.url),
            reference_data,
        })
    }
}

#[async_trait]
impl MediaProvider for IgdbProvider {
    fn source(&self) -> Source {
        Source::Igdb
    }

    fn is_configured(&self) -> bool {
        self.auth.is_configured()
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError> {
        let body = format!(
            "search \"{}\"; fields {GAME_FIELDS}; limit {};",
            escape_query(query),
            options.limit_or(20)
        );
        self.query_games(body).await
    }

    async fn details(
        &self,
        id: &str,
        _kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError> {
        // Validated up front: the id is interpolated into the query body.
        let id: u64 = id.parse().map_err(|_| ProviderError::Malformed {
            provider: Source::Igdb,
            message: format!("game id must be numeric, got {id:?}"),
        })?;
        let body = format!("fields {GAME_FIELDS}; where id = {id};");
        let mut records = self.query_games(body).await?;
        if records.is_empty() {
            // IGDB answers an unknown id with an empty array, not a 404.
            return Err(ProviderError::UpstreamStatus {
                provider: Source::Igdb,
                status: 404,
            });
        }
        Ok(records.swap_remove(0))
    }

    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let body = format!(
            "fields {GAME_FIELDS}; where hypes != null; sort hypes desc; limit {limit};"
        );
        self.query_games(body).await
    }

    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let body = format!(
            "fields {GAME_FIELDS}; where total_rating_count != null; \
             sort total_rating_count desc; limit {limit};"
        );
        self.query_games(body).await
    }
}

// ---------------------------------------------------------------------------
// Normalization helpers
// ---------------------------------------------------------------------------

fn names(entries: &[Named]) -> Value {
    Value::Array(entries.iter().map(|e| json!(e.name)).collect())
}

/// IGDB cover URLs come protocol-relative and thumbnail-sized.
fn cover_url(url: Option<&str>) -> Option<String> {
    let url = url.filter(|u| !u.is_empty())?;
    let absolute = if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        url.to_string()
    };
    Some(absolute.replace("t_thumb", "t_cover_big"))
}

fn date_from_timestamp(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive().to_string())
}

/// Quotes and backslashes would otherwise terminate the APICalypse string
/// literal early.
fn escape_query(query: &str) -> String {
    query.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> IgdbProvider {
        let mut config = ProviderConfig::defaults_for(Source::Igdb);
        config.client_id = Some("id".into());
        config.client_secret = Some("secret".into());
        IgdbProvider::new(
            &config,
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
        )
    }

    fn game(value: Value) -> Game {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn rating_normalizes_to_five_point_scale() {
        let record = provider()
            .record_from_game(game(json!({
                "id": 1942,
                "name": "The Witcher 3: Wild Hunt",
                "total_rating": 82.0,
                "total_rating_count": 2543
            })))
            .unwrap();
        let rating = record.average_rating.unwrap();
        assert!((rating - 4.1).abs() < 1e-9);
        assert_eq!(record.total_reviews, Some(2543));
    }

    #[test]
    fn cover_urls_get_protocol_and_size() {
        let record = provider()
            .record_from_game(game(json!({
                "id": 7346,
                "name": "Zelda",
                "cover": {"id": 1, "url": "//images.igdb.com/igdb/image/upload/t_thumb/co3p2d.jpg"}
            })))
            .unwrap();
        assert_eq!(
            record.cover_image.as_deref(),
            Some("https://images.igdb.com/igdb/image/upload/t_cover_big/co3p2d.jpg")
        );
    }

    #[test]
    fn release_timestamps_become_iso_dates() {
        let record = provider()
            .record_from_game(game(json!({
                "id": 1,
                "name": "Halo Infinite",
                "first_release_date": 1638921600
            })))
            .unwrap();
        assert_eq!(record.release_date.as_deref(), Some("2021-12-08"));
    }

    #[test]
    fn nameless_games_are_skipped() {
        assert!(provider().record_from_game(game(json!({"id": 5}))).is_none());
    }

    #[test]
    fn genres_and_platforms_land_in_reference_data() {
        let record = provider()
            .record_from_game(game(json!({
                "id": 9,
                "name": "Doom",
                "genres": [{"id": 5, "name": "Shooter"}],
                "platforms": [{"id": 6, "name": "PC (Microsoft Windows)"}],
                "hypes": 12
            })))
            .unwrap();
        assert_eq!(record.reference_data["genres"], json!(["Shooter"]));
        assert_eq!(
            record.reference_data["platforms"],
            json!(["PC (Microsoft Windows)"])
        );
        assert_eq!(record.reference_data["hypes"], json!(12));
        assert_eq!(record.attribution.source_url, "https://www.igdb.com");
    }

    #[test]
    fn query_escaping_neutralizes_quotes() {
        assert_eq!(escape_query(r#"portal "2""#), r#"portal \"2\""#);
        assert_eq!(escape_query(r"a\b"), r"a\\b");
    }

    #[test]
    fn unconfigured_adapter_reports_itself() {
        let config = ProviderConfig::defaults_for(Source::Igdb);
        let provider = IgdbProvider::new(
            &config,
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
        );
        assert!(!provider.is_configured());
    }
}
