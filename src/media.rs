//! Canonical media types exchanged between provider adapters and consumers.
//!
//! Every adapter, whatever the upstream schema looks like, produces
//! [`MediaRecord`] values. Downstream layers (import, recommendations, UI
//! feeds) only ever see this shape, so the serialized field names here are a
//! wire contract and use camelCase.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Provider identity
// ---------------------------------------------------------------------------

/// The external service a record came from.
///
/// The tag is part of the record identity: `(source, external_id)` is the
/// only stable key for caching and deduplication. Titles are display text,
/// never identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Tmdb,
    Igdb,
    Rawg,
    GoogleBooks,
    Lastfm,
    ComicVine,
}

impl Source {
    /// Every supported source, in registration order.
    pub const ALL: [Source; 6] = [
        Source::Tmdb,
        Source::Igdb,
        Source::Rawg,
        Source::GoogleBooks,
        Source::Lastfm,
        Source::ComicVine,
    ];

    /// Lowercase tag used in cache keys, logs and the serialized form.
    pub fn tag(&self) -> &'static str {
        match self {
            Source::Tmdb => "tmdb",
            Source::Igdb => "igdb",
            Source::Rawg => "rawg",
            Source::GoogleBooks => "googlebooks",
            Source::Lastfm => "lastfm",
            Source::ComicVine => "comicvine",
        }
    }

    /// Human-readable service name for attribution text.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Tmdb => "TMDB",
            Source::Igdb => "IGDB",
            Source::Rawg => "RAWG",
            Source::GoogleBooks => "Google Books",
            Source::Lastfm => "Last.fm",
            Source::ComicVine => "Comic Vine",
        }
    }

    /// Service homepage, used for attribution when an item has no
    /// item-specific page.
    pub fn homepage(&self) -> &'static str {
        match self {
            Source::Tmdb => "https://www.themoviedb.org",
            Source::Igdb => "https://www.igdb.com",
            Source::Rawg => "https://rawg.io",
            Source::GoogleBooks => "https://books.google.com",
            Source::Lastfm => "https://www.last.fm",
            Source::ComicVine => "https://comicvine.gamespot.com",
        }
    }

    /// License tag to credit alongside the data, where the service
    /// publishes one.
    pub fn license(&self) -> Option<&'static str> {
        match self {
            // Last.fm wiki content is community-written under CC-BY-SA.
            Source::Lastfm => Some("CC-BY-SA"),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tmdb" => Ok(Source::Tmdb),
            "igdb" => Ok(Source::Igdb),
            "rawg" => Ok(Source::Rawg),
            "googlebooks" | "google_books" | "books" => Ok(Source::GoogleBooks),
            "lastfm" | "last.fm" => Ok(Source::Lastfm),
            "comicvine" | "comic_vine" => Ok(Source::ComicVine),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Media kind
// ---------------------------------------------------------------------------

/// What kind of media a record describes.
///
/// The kind is derived from the provider that produced the record (or, for
/// TMDB, from the per-item type in its payload). Callers never request a
/// kind from an adapter directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    TvShow,
    Game,
    Book,
    Music,
    Comic,
}

impl MediaKind {
    /// Every supported kind.
    pub const ALL: [MediaKind; 6] = [
        MediaKind::Movie,
        MediaKind::TvShow,
        MediaKind::Game,
        MediaKind::Book,
        MediaKind::Music,
        MediaKind::Comic,
    ];

    /// Lowercase snake_case tag matching the serialized form.
    pub fn tag(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::TvShow => "tv_show",
            MediaKind::Game => "game",
            MediaKind::Book => "book",
            MediaKind::Music => "music",
            MediaKind::Comic => "comic",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" | "movies" => Ok(MediaKind::Movie),
            "tv_show" | "tv" | "show" => Ok(MediaKind::TvShow),
            "game" | "games" => Ok(MediaKind::Game),
            "book" | "books" => Ok(MediaKind::Book),
            "music" | "album" => Ok(MediaKind::Music),
            "comic" | "comics" => Ok(MediaKind::Comic),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// Provenance metadata attached to every externally-sourced record.
///
/// Crediting the data origin is a condition of use for all six upstream
/// services, so a record without attribution never leaves an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribution {
    /// Display name of the service ("TMDB", "Google Books", ...).
    pub source: String,
    /// Item page on the service, or the service homepage as a fallback.
    pub source_url: String,
    /// License tag for the credited content, if the service publishes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// When this record was fetched and normalized.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

/// The canonical, provider-agnostic media record.
///
/// All adapters normalize their upstream payloads into this shape. Fields
/// that an upstream schema cannot supply are `None`; `reference_data` holds
/// whatever provider-specific extras survive normalization (genres, cast,
/// platforms, authors, tracks, ...). The extras stay untyped on purpose:
/// the six upstream schemas have nothing in common there, and each adapter
/// documents the keys it populates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    /// Provider-local identifier, unique and stable within `source`.
    pub external_id: String,
    /// Which provider produced this record.
    #[serde(rename = "externalSource")]
    pub source: Source,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mediaType")]
    pub kind: MediaKind,
    /// ISO-8601 date, possibly partial ("2021-10-22", "2021-10", "2021").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// Absolute https URL to cover art.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    /// Rating on the provider's documented normalized scale (see the
    /// adapter for whether that is 0-5 or 0-10).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_reviews: Option<u64>,
    pub attribution: Attribution,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub reference_data: Map<String, Value>,
}

impl MediaRecord {
    /// The `(source, external_id)` pair that identifies this record for
    /// caching and deduplication.
    pub fn identity(&self) -> (Source, &str) {
        (self.source, &self.external_id)
    }
}

// ---------------------------------------------------------------------------
// News / new-release feed items
// ---------------------------------------------------------------------------

/// An entry in a provider's news or new-releases feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub source: Source,
    /// ISO-8601 date of the release or article, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

// ---------------------------------------------------------------------------
// Search options
// ---------------------------------------------------------------------------

/// Caller-tunable knobs for search operations.
///
/// Adapters translate these into whatever their upstream calls the same
/// concepts (`page`/`page_size`, `maxResults`/`startIndex`, `limit`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// 1-based result page. `None` means the first page.
    pub page: Option<u32>,
    /// Results per page. `None` means the adapter default (20).
    pub limit: Option<u32>,
}

impl SearchOptions {
    pub fn page_or_first(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit_or(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).max(1)
    }
}
