//! Last.fm adapter for music (albums and chart tracks).
//!
//! Last.fm's API is a single endpoint with `method=` dispatch, and its
//! payloads are the loosest of the six upstreams: numbers arrive as
//! strings, `artist` is a plain string in album search but an object in
//! the tag and chart feeds, and failures come back in-band with HTTP 200.
//! Not every album has a MusicBrainz id, so the record id is the `mbid`
//! when present and `artist||title` otherwise; `details` understands both.
//! Last.fm publishes no ratings, so `average_rating` is always `None`.
//!
//! `reference_data` keys: `artist`, `listeners`, `playcount`, `tracks`.

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

/// Separator for the synthetic `artist||title` id form. Double pipe keeps
/// single pipes inside titles unambiguous enough in practice.
const ID_SEPARATOR: &str = "||";
const POPULAR_TAG: &str = "pop";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchRoot {
    results: Option<SearchResults>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    albummatches: Option<AlbumMatches>,
}

#[derive(Debug, Deserialize)]
struct AlbumMatches {
    #[serde(default)]
    album: Vec<Value>,
}

/// Album as returned by `album.search`, artist as a plain string.
#[derive(Debug, Deserialize)]
struct SearchAlbum {
    name: Option<String>,
    artist: Option<String>,
    url: Option<String>,
    mbid: Option<String>,
    #[serde(default)]
    image: Vec<SizedImage>,
}

#[derive(Debug, Deserialize)]
struct SizedImage {
    #[serde(rename = "#text")]
    url: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoRoot {
    album: Option<AlbumInfo>,
}

#[derive(Debug, Deserialize)]
struct AlbumInfo {
    name: Option<String>,
    artist: Option<String>,
    url: Option<String>,
    mbid: Option<String>,
    #[serde(default)]
    image: Vec<SizedImage>,
    listeners: Option<String>,
    playcount: Option<String>,
    wiki: Option<Wiki>,
    /// `tracks.track` is an array for most albums but a bare object for
    /// single-track releases, so it stays untyped until extraction.
    tracks: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Wiki {
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartRoot {
    tracks: Option<TrackList>,
}

#[derive(Debug, Deserialize)]
struct TrackList {
    #[serde(default)]
    track: Vec<Value>,
}

/// Track as returned by `chart.gettoptracks`, artist as an object.
#[derive(Debug, Deserialize)]
struct ChartTrack {
    name: Option<String>,
    url: Option<String>,
    mbid: Option<String>,
    artist: Option<ArtistRef>,
    listeners: Option<String>,
    playcount: Option<String>,
    #[serde(default)]
    image: Vec<SizedImage>,
}

#[derive(Debug, Deserialize)]
struct TagRoot {
    albums: Option<AlbumList>,
}

#[derive(Debug, Deserialize)]
struct AlbumList {
    #[serde(default)]
    album: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TagAlbum {
    name: Option<String>,
    url: Option<String>,
    mbid: Option<String>,
    artist: Option<ArtistRef>,
    #[serde(default)]
    image: Vec<SizedImage>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    name: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct LastfmProvider {
    client: ProviderClient,
    api_key: Option<String>,
}

impl LastfmProvider {
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
                provider: Source::Lastfm,
                message: "missing api key".into(),
            })
    }

    async fn call(&self, method: &str, extra: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let key = self.key()?;
        let mut params = vec![("method", method), ("api_key", key), ("format", "json")];
        params.extend_from_slice(extra);
        let url = self.client.url("", &params)?;
        let payload = self.client.get_json(url).await?;
        check_inband_error(&payload)?;
        Ok((*payload).clone())
    }

    fn record_from_search(&self, album: SearchAlbum) -> Option<MediaRecord> {
        let title = album.name.filter(|name| !name.is_empty())?;
        let artist = album.artist.filter(|artist| !artist.is_empty());
        self.build_record(
            title,
            artist,
            album.mbid,
            album.url,
            &album.image,
            None,
            Map::new(),
        )
    }

    fn record_from_info(&self, info: AlbumInfo) -> Option<MediaRecord> {
        let title = info.name.filter(|name| !name.is_empty())?;
        let artist = info.artist.filter(|artist| !artist.is_empty());
        let mut reference_data = Map::new();
        if let Some(listeners) = parse_count(info.listeners.as_deref()) {
            reference_data.insert("listeners".into(), json!(listeners));
        }
        if let Some(playcount) = parse_count(info.playcount.as_deref()) {
            reference_data.insert("playcount".into(), json!(playcount));
        }
        if let Some(tracks) = track_names(info.tracks.as_ref()) {
            reference_data.insert("tracks".into(), tracks);
        }
        let description = info
            .wiki
            .and_then(|wiki| wiki.summary)
            .as_deref()
            .and_then(clean_summary);
        self.build_record(
            title,
            artist,
            info.mbid,
            info.url,
            &info.image,
            description,
            reference_data,
        )
    }

    fn record_from_chart_track(&self, track: ChartTrack) -> Option<MediaRecord> {
        let title = track.name.filter(|name| !name.is_empty())?;
        let artist = track.artist.and_then(|a| a.name).filter(|n| !n.is_empty());
        let mut reference_data = Map::new();
        if let Some(listeners) = parse_count(track.listeners.as_deref()) {
            reference_data.insert("listeners".into(), json!(listeners));
        }
        if let Some(playcount) = parse_count(track.playcount.as_deref()) {
            reference_data.insert("playcount".into(), json!(playcount));
        }
        self.build_record(
            title,
            artist,
            track.mbid,
            track.url,
            &track.image,
            None,
            reference_data,
        )
    }

    fn record_from_tag_album(&self, album: TagAlbum) -> Option<MediaRecord> {
        let title = album.name.filter(|name| !name.is_empty())?;
        let artist = album.artist.and_then(|a| a.name).filter(|n| !n.is_empty());
        self.build_record(
            title,
            artist,
            album.mbid,
            album.url,
            &album.image,
            None,
            Map::new(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        title: String,
        artist: Option<String>,
        mbid: Option<String>,
        url: Option<String>,
        images: &[SizedImage],
        description: Option<String>,
        mut reference_data: Map<String, Value>,
    ) -> Option<MediaRecord> {
        let external_id = match mbid.filter(|mbid| !mbid.is_empty()) {
            Some(mbid) => mbid,
            None => format!(
                "{}{ID_SEPARATOR}{title}",
                artist.as_deref().unwrap_or_default()
            ),
        };
        if let Some(artist) = &artist {
            reference_data.insert("artist".into(), json!(artist));
        }
        Some(MediaRecord {
            external_id,
            source: Source::Lastfm,
            title,
            description,
            kind: MediaKind::Music,
            release_date: None,
            cover_image: pick_image(images),
            average_rating: None,
            total_reviews: None,
            attribution: self.client.attribution(url.filter(|u| !u.is_empty())),
            reference_data,
        })
    }
}

#[async_trait]
impl MediaProvider for LastfmProvider {
    fn source(&self) -> Source {
        Source::Lastfm
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MediaRecord>, ProviderError> {
        debug!(query, "Last.fm album search");
        let limit = options.limit_or(20).to_string();
        let page = options.page_or_first().to_string();
        let payload = self
            .call(
                "album.search",
                &[("album", query), ("limit", &limit), ("page", &page)],
            )
            .await?;
        let root: SearchRoot =
            serde_json::from_value(payload).map_err(|err| malformed(Source::Lastfm, err))?;
        let matches = root
            .results
            .and_then(|results| results.albummatches)
            .map(|matches| matches.album)
            .unwrap_or_default();
        Ok(matches
            .into_iter()
            .filter_map(|album| lenient_item(Source::Lastfm, album))
            .filter_map(|album| self.record_from_search(album))
            .collect())
    }

    async fn details(
        &self,
        id: &str,
        _kind: Option<MediaKind>,
    ) -> Result<MediaRecord, ProviderError> {
        let payload = match id.split_once(ID_SEPARATOR) {
            Some((artist, album)) => {
                self.call("album.getinfo", &[("artist", artist), ("album", album)])
                    .await?
            }
            None => self.call("album.getinfo", &[("mbid", id)]).await?,
        };
        let root: InfoRoot =
            serde_json::from_value(payload).map_err(|err| malformed(Source::Lastfm, err))?;
        let info = root
            .album
            .ok_or_else(|| malformed(Source::Lastfm, "missing album object"))?;
        self.record_from_info(info)
            .ok_or_else(|| malformed(Source::Lastfm, "album without a name"))
    }

    async fn trending(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let limit_param = limit.to_string();
        let payload = self
            .call("chart.gettoptracks", &[("limit", &limit_param)])
            .await?;
        let root: ChartRoot =
            serde_json::from_value(payload).map_err(|err| malformed(Source::Lastfm, err))?;
        let tracks = root.tracks.map(|list| list.track).unwrap_or_default();
        Ok(tracks
            .into_iter()
            .filter_map(|track| lenient_item(Source::Lastfm, track))
            .filter_map(|track| self.record_from_chart_track(track))
            .take(limit)
            .collect())
    }

    async fn popular(&self, limit: usize) -> Result<Vec<MediaRecord>, ProviderError> {
        let limit_param = limit.to_string();
        let payload = self
            .call(
                "tag.gettopalbums",
                &[("tag", POPULAR_TAG), ("limit", &limit_param)],
            )
            .await?;
        let root: TagRoot =
            serde_json::from_value(payload).map_err(|err| malformed(Source::Lastfm, err))?;
        let albums = root.albums.map(|list| list.album).unwrap_or_default();
        Ok(albums
            .into_iter()
            .filter_map(|album| lenient_item(Source::Lastfm, album))
            .filter_map(|album| self.record_from_tag_album(album))
            .take(limit)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Last.fm reports failures in the body with HTTP 200. Code 6 is its
/// not-found, which callers expect as an upstream 404.
fn check_inband_error(payload: &Value) -> Result<(), ProviderError> {
    let Some(code) = payload.get("error").and_then(Value::as_i64) else {
        return Ok(());
    };
    if code == 6 {
        return Err(ProviderError::UpstreamStatus {
            provider: Source::Lastfm,
            status: 404,
        });
    }
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Err(ProviderError::Malformed {
        provider: Source::Lastfm,
        message: format!("error {code}: {message}"),
    })
}

/// Largest usable image: `extralarge` when present, otherwise the last
/// non-empty entry (sizes are ordered small to mega).
fn pick_image(images: &[SizedImage]) -> Option<String> {
    let best = images
        .iter()
        .find(|image| image.size.as_deref() == Some("extralarge"))
        .and_then(|image| image.url.as_deref())
        .filter(|url| !url.is_empty());
    best.map(str::to_string).or_else(|| {
        images
            .iter()
            .rev()
            .filter_map(|image| image.url.as_deref())
            .find(|url| !url.is_empty())
            .map(str::to_string)
    })
}

fn parse_count(raw: Option<&str>) -> Option<u64> {
    raw?.parse().ok()
}

/// Album wikis end with a "Read more on Last.fm" anchor; cut it off.
fn clean_summary(summary: &str) -> Option<String> {
    let text = summary
        .split("<a href")
        .next()
        .unwrap_or(summary)
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

fn track_names(tracks: Option<&Value>) -> Option<Value> {
    let track = tracks?.get("track")?;
    let names: Vec<Value> = match track {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("name"))
            .cloned()
            .collect(),
        Value::Object(_) => track.get("name").cloned().into_iter().collect(),
        _ => return None,
    };
    (!names.is_empty()).then_some(Value::Array(names))
}
