//! Shared HTTP plumbing for provider adapters.
//!
//! Every adapter routes its upstream calls through a [`ProviderClient`],
//! which layers, in order:
//!
//! 1. response cache lookup
//! 2. coalescing of identical concurrent requests onto one upstream call
//! 3. the provider's token-bucket rate limiter
//! 4. a deadline covering both the limiter wait and the HTTP exchange
//! 5. bounded retry for transient failures (off unless configured)
//!
//! Adapters only decide which URLs to hit and how to normalize what comes
//! back; they never talk to `reqwest` directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::cache::ResponseCache;
use crate::config::ProviderConfig;
use crate::error::{retry_with_backoff, ProviderError, RetryPolicy};
use crate::limiter::RateLimiter;
use crate::media::{Attribution, Source};

type Outcome = Result<Arc<Value>, ProviderError>;

enum Flight {
    Lead(watch::Sender<Option<Outcome>>),
    Join(watch::Receiver<Option<Outcome>>),
}

/// Rate-limited, cached, deadline-bounded JSON fetcher for one provider.
pub struct ProviderClient {
    source: Source,
    http: reqwest::Client,
    cache: Arc<ResponseCache>,
    limiter: RateLimiter,
    request_timeout: Duration,
    retry: RetryPolicy,
    base_url: String,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, cache: Arc<ResponseCache>, config: &ProviderConfig) -> Self {
        Self {
            source: config.source,
            http,
            cache,
            limiter: RateLimiter::new(config.max_requests, config.interval),
            request_timeout: config.timeout,
            retry: config.retry,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Builds a request URL under the provider's base, percent-encoding the
    /// query parameters.
    pub fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let full = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse_with_params(&full, params).map_err(|err| ProviderError::Transport {
            provider: self.source,
            message: format!("invalid request url {full:?}: {err}"),
        })
    }

    /// GET `url` and decode the body as JSON, going through the cache and
    /// the rate limiter.
    pub async fn get_json(&self, url: Url) -> Outcome {
        self.fetch(Method::GET, url, None, &[]).await
    }

    /// POST `body` to `url` with extra headers. The body participates in
    /// the cache key, so distinct queries against one endpoint cache
    /// independently.
    pub async fn post_json(&self, url: Url, body: String, headers: &[(&str, String)]) -> Outcome {
        self.fetch(Method::POST, url, Some(body), headers).await
    }

    /// Attribution block for a record fetched through this client, pointing
    /// at the item page when one exists and the service homepage otherwise.
    pub fn attribution(&self, item_url: Option<String>) -> Attribution {
        Attribution {
            source: self.source.display_name().to_string(),
            source_url: item_url.unwrap_or_else(|| self.source.homepage().to_string()),
            license: self.source.license().map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    async fn fetch(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        headers: &[(&str, String)],
    ) -> Outcome {
        let cache_key = match &body {
            Some(body) => format!("{url}|{body}"),
            None => url.to_string(),
        };
        loop {
            if let Some(hit) = self.cache.get(&cache_key, self.source) {
                debug!(provider = %self.source, url = %url, "serving cached response");
                return Ok(hit);
            }
            match self.begin(&cache_key) {
                Flight::Lead(tx) => {
                    let outcome = retry_with_backoff(self.retry, || {
                        self.attempt(method.clone(), &url, body.as_deref(), headers)
                    })
                    .await
                    .map(|value| self.cache.set(&cache_key, value, self.source));
                    self.finish(&cache_key, &tx, outcome.clone());
                    return outcome;
                }
                Flight::Join(mut rx) => {
                    debug!(provider = %self.source, url = %url, "joining in-flight request");
                    let joined = loop {
                        let published = rx.borrow_and_update().clone();
                        if let Some(outcome) = published {
                            break Some(outcome);
                        }
                        if rx.changed().await.is_err() {
                            break None;
                        }
                    };
                    match joined {
                        Some(outcome) => return outcome,
                        // The leader was dropped before publishing; take
                        // another pass, most likely as the new leader.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Joins an in-flight request for `key` or registers this caller as the
    /// leader. A channel whose sender is gone without a published value is
    /// a flight whose leader was cancelled, and is replaced.
    fn begin(&self, key: &str) -> Flight {
        let mut in_flight = self.in_flight.lock();
        if let Some(rx) = in_flight.get(key) {
            if rx.borrow().is_some() || rx.has_changed().is_ok() {
                return Flight::Join(rx.clone());
            }
        }
        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.to_string(), rx);
        Flight::Lead(tx)
    }

    fn finish(&self, key: &str, tx: &watch::Sender<Option<Outcome>>, outcome: Outcome) {
        self.in_flight.lock().remove(key);
        // Nobody listening is fine.
        let _ = tx.send(Some(outcome));
    }

    /// One upstream exchange under the provider deadline. The deadline
    /// covers the limiter wait too, so a saturated bucket surfaces as a
    /// timeout instead of an unbounded stall.
    async fn attempt(
        &self,
        method: Method,
        url: &Url,
        body: Option<&str>,
        headers: &[(&str, String)],
    ) -> Result<Value, ProviderError> {
        let exchange = async {
            self.limiter.acquire().await;
            let mut request = self.http.request(method, url.clone());
            if let Some(body) = body {
                request = request.body(body.to_string());
            }
            for (name, value) in headers {
                request = request.header(*name, value);
            }
            debug!(provider = %self.source, url = %url, "requesting upstream");
            let response = request.send().await.map_err(|err| ProviderError::Transport {
                provider: self.source,
                message: err.to_string(),
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::UpstreamStatus {
                    provider: self.source,
                    status: status.as_u16(),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|err| ProviderError::Malformed {
                    provider: self.source,
                    message: err.to_string(),
                })
        };
        match timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: self.source,
                limit: self.request_timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, source: Source) -> ProviderClient {
        let mut config = ProviderConfig::defaults_for(source);
        config.base_url = server.uri();
        config.timeout = Duration::from_secs(2);
        ProviderClient::new(
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
            &config,
        )
    }

    #[tokio::test]
    async fn repeated_get_hits_upstream_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "dune"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"page": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Source::Tmdb);
        let url = client.url("search", &[("q", "dune")]).unwrap();
        let first = client.get_json(url.clone()).await.unwrap();
        let second = client.get_json(url).await.unwrap();
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_coalesce() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_millis(150)),
            )
            .expect(1)
            .mount(&server)
            .await;

        // IGDB never caches, so coalescing alone must prevent the second
        // upstream call.
        let client = client_for(&server, Source::Igdb);
        let url = client.url("slow", &[]).unwrap();
        let (a, b) = tokio::join!(client.get_json(url.clone()), client.get_json(url));
        assert_eq!(*a.unwrap(), json!({"ok": true}));
        assert_eq!(*b.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn non_success_status_maps_to_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let client = client_for(&server, Source::Rawg);
        let url = client.url("missing", &[]).unwrap();
        let err = client.get_json(url).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::UpstreamStatus {
                provider: Source::Rawg,
                status: 404
            }
        );
    }

    #[tokio::test]
    async fn error_responses_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Source::Tmdb);
        let url = client.url("flaky", &[]).unwrap();
        assert!(client.get_json(url.clone()).await.is_err());
        assert!(client.get_json(url).await.is_ok());
    }

    #[tokio::test]
    async fn retry_policy_recovers_from_transient_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ProviderConfig::defaults_for(Source::Tmdb);
        config.base_url = server.uri();
        config.retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };
        let client = ProviderClient::new(
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
            &config,
        );
        let url = client.url("shaky", &[]).unwrap();
        assert_eq!(*client.get_json(url).await.unwrap(), json!({"ok": 1}));
    }

    #[tokio::test]
    async fn deadline_turns_slow_upstreams_into_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stuck"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let mut config = ProviderConfig::defaults_for(Source::Lastfm);
        config.base_url = server.uri();
        config.timeout = Duration::from_millis(100);
        let client = ProviderClient::new(
            reqwest::Client::new(),
            Arc::new(ResponseCache::with_default_policies()),
            &config,
        );
        let url = client.url("stuck", &[]).unwrap();
        let err = client.get_json(url).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { provider: Source::Lastfm, .. }));
    }

    #[tokio::test]
    async fn post_bodies_cache_independently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/games"))
            .and(body_string_contains("halo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/games"))
            .and(body_string_contains("doom"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 2}])))
            .expect(1)
            .mount(&server)
            .await;

        // RAWG caches, making the distinct-key behavior observable.
        let client = client_for(&server, Source::Rawg);
        let url = client.url("games", &[]).unwrap();
        let halo = client
            .post_json(url.clone(), "search \"halo\";".into(), &[])
            .await
            .unwrap();
        let doom = client
            .post_json(url.clone(), "search \"doom\";".into(), &[])
            .await
            .unwrap();
        let halo_again = client
            .post_json(url, "search \"halo\";".into(), &[])
            .await
            .unwrap();
        assert_eq!(*halo, json!([{"id": 1}]));
        assert_eq!(*doom, json!([{"id": 2}]));
        assert_eq!(*halo_again, *halo);
    }

    #[tokio::test]
    async fn url_builder_encodes_query_parameters() {
        let server = MockServer::start().await;
        let client = client_for(&server, Source::GoogleBooks);
        let url = client
            .url("volumes", &[("q", "dune messiah"), ("maxResults", "5")])
            .unwrap();
        assert!(url.as_str().contains("volumes?q=dune%20messiah&maxResults=5"));
    }
}
