//! Provider integration tests
//!
//! End-to-end flows through the aggregator, the real adapters, the shared
//! response cache and a wiremock upstream standing in for all six APIs.

mod common;

use common::test_config;
use metahub::aggregator::Aggregator;
use metahub::error::ProviderError;
use metahub::media::{MediaKind, SearchOptions, Source};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tmdb_search_body() -> serde_json::Value {
    json!({
        "page": 1,
        "results": [{
            "id": 438631,
            "media_type": "movie",
            "title": "Dune",
            "overview": "Paul Atreides, a brilliant and gifted young man...",
            "release_date": "2021-10-22",
            "poster_path": "/d5NXSklXo0qyIYkgV94XAgMIckC.jpg",
            "vote_average": 7.8,
            "vote_count": 9942
        }]
    })
}

#[tokio::test]
async fn test_search_normalizes_and_caches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tmdb/search/multi"))
        .and(query_param("query", "dune"))
        .and(query_param("api_key", "tmdb-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tmdb_search_body()))
        .expect(1)
        .mount(&server)
        .await;

    let aggregator = Aggregator::from_config(&test_config(&server.uri())).unwrap();

    let first = aggregator
        .search("dune", &[MediaKind::Movie], &SearchOptions::default())
        .await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].external_id, "438631");
    assert_eq!(first[0].source, Source::Tmdb);
    assert_eq!(first[0].kind, MediaKind::Movie);
    assert_eq!(first[0].average_rating, Some(7.8));
    assert_eq!(
        first[0].cover_image.as_deref(),
        Some("https://image.tmdb.org/t/p/w500/d5NXSklXo0qyIYkgV94XAgMIckC.jpg")
    );

    // Served from cache, hence expect(1) on the mock.
    let second = aggregator
        .search("dune", &[MediaKind::Movie], &SearchOptions::default())
        .await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].external_id, first[0].external_id);
    assert_eq!(second[0].title, first[0].title);
}

#[tokio::test]
async fn test_cache_clear_forces_a_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tmdb/search/multi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tmdb_search_body()))
        .expect(2)
        .mount(&server)
        .await;

    let aggregator = Aggregator::from_config(&test_config(&server.uri())).unwrap();
    aggregator
        .search("dune", &[MediaKind::Movie], &SearchOptions::default())
        .await;
    aggregator.clear_cache(None);
    aggregator
        .search("dune", &[MediaKind::Movie], &SearchOptions::default())
        .await;
}

#[tokio::test]
async fn test_unknown_movie_id_maps_to_upstream_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tmdb/movie/99999999"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "status_code": 34,
            "status_message": "The resource you requested could not be found."
        })))
        .mount(&server)
        .await;

    let aggregator = Aggregator::from_config(&test_config(&server.uri())).unwrap();
    let err = aggregator
        .details(MediaKind::Movie, "99999999")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.provider(), Source::Tmdb);
}

#[tokio::test]
async fn test_game_search_spans_both_catalogs() {
    let server = MockServer::start().await;

    // One token exchange covers both queries.
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(query_param("client_id", "client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    // IGDB responses are never cached, so the second search hits again.
    Mock::given(method("POST"))
        .and(path("/igdb/games"))
        .and(header("Client-ID", "client-id"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_string_contains("search \"zelda\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 1942,
            "name": "The Legend of Zelda: Breath of the Wild",
            "total_rating": 82.0,
            "total_rating_count": 2543
        }])))
        .expect(2)
        .mount(&server)
        .await;

    // RAWG is cached for a day, so only the first search reaches it.
    Mock::given(method("GET"))
        .and(path("/rawg/games"))
        .and(query_param("search", "zelda"))
        .and(query_param("key", "rawg-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": 3328,
                "slug": "the-legend-of-zelda-breath-of-the-wild",
                "name": "The Legend of Zelda: Breath of the Wild",
                "released": "2017-03-03",
                "rating": 4.53,
                "ratings_count": 5231
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let aggregator = Aggregator::from_config(&test_config(&server.uri())).unwrap();

    for _ in 0..2 {
        let results = aggregator
            .search("zelda", &[MediaKind::Game], &SearchOptions::default())
            .await;
        assert_eq!(results.len(), 2);

        let igdb = results.iter().find(|r| r.source == Source::Igdb).unwrap();
        let rating = igdb.average_rating.unwrap();
        assert!((rating - 4.1).abs() < 1e-9);

        let rawg = results.iter().find(|r| r.source == Source::Rawg).unwrap();
        assert_eq!(rawg.average_rating, Some(4.53));
        assert_eq!(rawg.release_date.as_deref(), Some("2017-03-03"));
    }
}

#[tokio::test]
async fn test_stalled_token_exchange_times_out() {
    let server = MockServer::start().await;
    // The token endpoint hangs well past the configured deadline.
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "late", "expires_in": 3600}))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.http.timeout_secs = 1;

    let aggregator = Aggregator::from_config(&config).unwrap();
    let err = aggregator
        .details_from(Source::Igdb, "1942", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { .. }));
}

#[tokio::test]
async fn test_transient_errors_retry_when_enabled() {
    let server = MockServer::start().await;

    // First attempt gets a 503, the retry lands on the healthy mock below.
    Mock::given(method("GET"))
        .and(path("/tmdb/search/multi"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tmdb/search/multi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tmdb_search_body()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.providers.tmdb.retry_attempts = Some(2);

    let aggregator = Aggregator::from_config(&config).unwrap();
    let results = aggregator
        .search("dune", &[MediaKind::Movie], &SearchOptions::default())
        .await;
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_unconfigured_providers_receive_no_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tmdb/search/multi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tmdb_search_body()))
        .mount(&server)
        .await;

    // Only TMDB gets credentials; music and comics stay unconfigured.
    let mut config = metahub::config::Config::default();
    config.providers.tmdb.api_key = Some("tmdb-key".into());
    config.providers.tmdb.base_url = Some(format!("{}/tmdb", server.uri()));
    config.providers.lastfm.base_url = Some(format!("{}/lastfm", server.uri()));
    config.providers.comic_vine.base_url = Some(format!("{}/comicvine", server.uri()));

    let aggregator = Aggregator::from_config(&config).unwrap();
    let results = aggregator
        .search(
            "dune",
            &[MediaKind::Movie, MediaKind::Music, MediaKind::Comic],
            &SearchOptions::default(),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, Source::Tmdb);

    let requests = server.received_requests().await.unwrap();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|r| r.url.path().starts_with("/tmdb")));
}

#[tokio::test]
async fn test_lastfm_inband_error_maps_to_not_found() {
    let server = MockServer::start().await;
    // HTTP 200 with an in-band error payload.
    Mock::given(method("GET"))
        .and(path("/lastfm/"))
        .and(query_param("method", "album.getinfo"))
        .and(query_param("artist", "Nobody"))
        .and(query_param("album", "Nothing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": 6,
            "message": "Album not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let aggregator = Aggregator::from_config(&test_config(&server.uri())).unwrap();
    let err = aggregator
        .details(MediaKind::Music, "Nobody||Nothing")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.provider(), Source::Lastfm);
}

#[tokio::test]
async fn test_book_ratings_double_to_the_ten_scale() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/books/volumes"))
        .and(query_param("q", "dune"))
        .and(query_param("printType", "books"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "B1zbDwAAQBAJ",
                "volumeInfo": {
                    "title": "Dune",
                    "authors": ["Frank Herbert"],
                    "publishedDate": "1965-08-01",
                    "averageRating": 4,
                    "ratingsCount": 813,
                    "imageLinks": {
                        "thumbnail": "http://books.google.com/books/content?id=B1zbDwAAQBAJ"
                    }
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let aggregator = Aggregator::from_config(&test_config(&server.uri())).unwrap();
    let results = aggregator
        .search("dune", &[MediaKind::Book], &SearchOptions::default())
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].external_id, "B1zbDwAAQBAJ");
    assert_eq!(results[0].average_rating, Some(8.0));
    // Covers are upgraded to https.
    assert!(results[0]
        .cover_image
        .as_deref()
        .unwrap()
        .starts_with("https://"));
}
