//! Shared test harness for integration tests.
//!
//! Provides [`test_config`], which points every provider at a single
//! wiremock server under a per-provider path prefix, with credentials
//! filled in so all six adapters report themselves configured.

use axum::body::Body;
use http_body_util::BodyExt;
use metahub::config::Config;

/// A config where every provider talks to `uri` instead of its real API.
///
/// Each provider gets its own path prefix (`/tmdb`, `/igdb`, ...) so one
/// mock server can stand in for all six upstreams.
pub fn test_config(uri: &str) -> Config {
    let mut config = Config::default();
    let providers = &mut config.providers;

    providers.tmdb.api_key = Some("tmdb-key".into());
    providers.tmdb.base_url = Some(format!("{uri}/tmdb"));

    providers.igdb.client_id = Some("client-id".into());
    providers.igdb.client_secret = Some("client-secret".into());
    providers.igdb.base_url = Some(format!("{uri}/igdb"));
    providers.igdb.token_url = Some(format!("{uri}/oauth2/token"));

    providers.rawg.api_key = Some("rawg-key".into());
    providers.rawg.base_url = Some(format!("{uri}/rawg"));

    providers.google_books.base_url = Some(format!("{uri}/books"));

    providers.lastfm.api_key = Some("lastfm-key".into());
    providers.lastfm.base_url = Some(format!("{uri}/lastfm"));

    providers.comic_vine.api_key = Some("cv-key".into());
    providers.comic_vine.base_url = Some(format!("{uri}/comicvine"));

    config
}

/// Helper to get response body as string
#[allow(dead_code)]
pub async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
