//! Configuration loading and per-provider settings.
//!
//! Everything has a sensible default: an empty config file (or none at all)
//! yields working rate limits, cache TTLs and base URLs for all six
//! providers, leaving only credentials to supply. Credentials come from the
//! TOML file or, preferably, from the environment (`TMDB_API_KEY`,
//! `TWITCH_CLIENT_ID`, ...), so config files can be committed without
//! leaking secrets.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{self, CachePolicy};
use crate::error::RetryPolicy;
use crate::media::Source;

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./metahub.toml",
        "~/.config/metahub/config.toml",
        "/etc/metahub/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration.
fn validate_config(config: &Config) -> Result<()> {
    if config.relay.port == 0 {
        anyhow::bail!("Relay port cannot be 0");
    }

    for source in Source::ALL {
        let resolved = config.provider(source);
        if reqwest::Url::parse(&resolved.base_url).is_err() {
            anyhow::bail!("Invalid base URL for {source}: {}", resolved.base_url);
        }
        if let Some(token_url) = &resolved.token_url {
            if reqwest::Url::parse(token_url).is_err() {
                anyhow::bail!("Invalid token URL for {source}: {token_url}");
            }
        }
        let settings = config.providers.for_source(source);
        if settings.max_requests == Some(0) {
            anyhow::bail!("{source} rate limit cannot allow 0 requests");
        }
        if settings.interval_secs == Some(0) {
            anyhow::bail!("{source} rate limit interval cannot be 0 seconds");
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8880
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Deadline per provider call, covering the rate-limiter wait and the
    /// HTTP exchange.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent on every outbound request. Comic Vine rejects clients without
    /// an identifying user agent.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("metahub/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Entry cap per provider before oldest-first eviction kicks in.
    #[serde(default = "default_max_entries")]
    pub max_entries_per_provider: usize,
}

fn default_max_entries() -> usize {
    cache::DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries_per_provider: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub tmdb: ProviderSettings,

    #[serde(default)]
    pub igdb: ProviderSettings,

    #[serde(default)]
    pub rawg: ProviderSettings,

    #[serde(default)]
    pub google_books: ProviderSettings,

    #[serde(default)]
    pub lastfm: ProviderSettings,

    #[serde(default)]
    pub comic_vine: ProviderSettings,
}

impl ProvidersConfig {
    pub fn for_source(&self, source: Source) -> &ProviderSettings {
        match source {
            Source::Tmdb => &self.tmdb,
            Source::Igdb => &self.igdb,
            Source::Rawg => &self.rawg,
            Source::GoogleBooks => &self.google_books,
            Source::Lastfm => &self.lastfm,
            Source::ComicVine => &self.comic_vine,
        }
    }
}

/// Per-provider overrides. Everything is optional; unset fields fall back
/// to the provider's documented defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderSettings {
    /// API key, for providers authenticating with one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// OAuth client id (IGDB via Twitch).
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret (IGDB via Twitch).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Override the API base URL, mainly for tests.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Override the OAuth token endpoint, mainly for tests.
    #[serde(default)]
    pub token_url: Option<String>,

    /// Response cache TTL in seconds. `0` disables caching for this
    /// provider.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    #[serde(default)]
    pub max_requests: Option<u32>,

    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Attempts per call, counting the first. `1` disables retries.
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    /// Preferred result language, for providers that accept one.
    #[serde(default)]
    pub language: Option<String>,
}

impl Config {
    /// Resolved settings for one provider: defaults, overridden by the
    /// config file, with credentials falling back to the environment.
    pub fn provider(&self, source: Source) -> ProviderConfig {
        let settings = self.providers.for_source(source);
        let mut resolved = ProviderConfig::defaults_for(source);

        if let Some(base_url) = &settings.base_url {
            resolved.base_url = base_url.clone();
        }
        if let Some(token_url) = &settings.token_url {
            resolved.token_url = Some(token_url.clone());
        }
        if let Some(max_requests) = settings.max_requests {
            resolved.max_requests = max_requests;
        }
        if let Some(interval_secs) = settings.interval_secs {
            resolved.interval = Duration::from_secs(interval_secs);
        }
        if let Some(attempts) = settings.retry_attempts {
            resolved.retry = RetryPolicy::attempts(attempts);
        }
        if settings.language.is_some() {
            resolved.language = settings.language.clone();
        }
        resolved.timeout = Duration::from_secs(self.http.timeout_secs);

        resolved.api_key = settings
            .api_key
            .clone()
            .or_else(|| env_credential(api_key_var(source)));
        resolved.client_id = settings.client_id.clone();
        resolved.client_secret = settings.client_secret.clone();
        if source == Source::Igdb {
            resolved.client_id = resolved
                .client_id
                .or_else(|| env_credential("TWITCH_CLIENT_ID"));
            resolved.client_secret = resolved
                .client_secret
                .or_else(|| env_credential("TWITCH_CLIENT_SECRET"));
        }

        resolved
    }

    /// Cache policy map for [`crate::cache::ResponseCache::new`], honoring
    /// per-provider TTL overrides and the global entry cap.
    pub fn cache_policies(&self) -> HashMap<Source, CachePolicy> {
        let mut policies = HashMap::new();
        for source in Source::ALL {
            let mut policy = cache::default_policy(source);
            if let Some(ttl_secs) = self.providers.for_source(source).cache_ttl_secs {
                policy.ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));
            }
            policy.max_entries = self.cache.max_entries_per_provider;
            policies.insert(source, policy);
        }
        policies
    }

    /// Shared HTTP client for all adapters and the relay.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.http.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")
    }
}

fn env_credential(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn api_key_var(source: Source) -> &'static str {
    match source {
        Source::Tmdb => "TMDB_API_KEY",
        Source::Igdb => "IGDB_API_KEY",
        Source::Rawg => "RAWG_API_KEY",
        Source::GoogleBooks => "GOOGLE_BOOKS_API_KEY",
        Source::Lastfm => "LASTFM_API_KEY",
        Source::ComicVine => "COMICVINE_API_KEY",
    }
}

// ---------------------------------------------------------------------------
// Resolved per-provider configuration
// ---------------------------------------------------------------------------

/// Fully-resolved settings handed to one adapter.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub source: Source,
    pub base_url: String,
    pub token_url: Option<String>,
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub max_requests: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub language: Option<String>,
}

impl ProviderConfig {
    /// The documented defaults for each provider: published API base URLs
    /// and rate limits as of the quotas each service grants free keys.
    pub fn defaults_for(source: Source) -> Self {
        let (base_url, max_requests, interval_secs) = match source {
            Source::Tmdb => ("https://api.themoviedb.org/3", 40, 10),
            Source::Igdb => ("https://api.igdb.com/v4", 4, 1),
            Source::Rawg => ("https://api.rawg.io/api", 5, 1),
            Source::GoogleBooks => ("https://www.googleapis.com/books/v1", 1000, 60),
            Source::Lastfm => ("https://ws.audioscrobbler.com/2.0", 5, 1),
            Source::ComicVine => ("https://comicvine.gamespot.com/api", 200, 3600),
        };
        let token_url = matches!(source, Source::Igdb)
            .then(|| "https://id.twitch.tv/oauth2/token".to_string());
        Self {
            source,
            base_url: base_url.to_string(),
            token_url,
            api_key: None,
            client_id: None,
            client_secret: None,
            max_requests,
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(default_timeout_secs()),
            retry: RetryPolicy::default(),
            language: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn documented_rate_limits_are_the_defaults() {
        let config = Config::default();
        let expect = [
            (Source::Tmdb, 40, 10),
            (Source::Igdb, 4, 1),
            (Source::Rawg, 5, 1),
            (Source::GoogleBooks, 1000, 60),
            (Source::Lastfm, 5, 1),
            (Source::ComicVine, 200, 3600),
        ];
        for (source, max_requests, interval_secs) in expect {
            let resolved = config.provider(source);
            assert_eq!(resolved.max_requests, max_requests, "{source}");
            assert_eq!(resolved.interval, Duration::from_secs(interval_secs), "{source}");
        }
    }

    #[test]
    fn documented_ttls_are_the_defaults() {
        let policies = Config::default().cache_policies();
        assert_eq!(
            policies[&Source::Tmdb].ttl,
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(policies[&Source::Igdb].ttl, None);
        assert_eq!(
            policies[&Source::GoogleBooks].ttl,
            Some(Duration::from_secs(604_800))
        );
        assert_eq!(
            policies[&Source::Lastfm].ttl,
            Some(Duration::from_secs(3_600))
        );
    }

    #[test]
    fn toml_overrides_apply() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            port = 9000

            [providers.tmdb]
            api_key = "abc"
            language = "de-DE"
            retry_attempts = 3

            [providers.rawg]
            cache_ttl_secs = 0
            max_requests = 2
            interval_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.port, 9000);
        let tmdb = config.provider(Source::Tmdb);
        assert_eq!(tmdb.api_key.as_deref(), Some("abc"));
        assert_eq!(tmdb.language.as_deref(), Some("de-DE"));
        assert_eq!(tmdb.retry.max_attempts, 3);

        let rawg = config.provider(Source::Rawg);
        assert_eq!(rawg.max_requests, 2);
        assert_eq!(rawg.interval, Duration::from_secs(5));
        // TTL of 0 disables caching.
        assert_eq!(config.cache_policies()[&Source::Rawg].ttl, None);
    }

    #[test]
    fn retry_is_off_by_default() {
        let tmdb = Config::default().provider(Source::Tmdb);
        assert_eq!(tmdb.retry.max_attempts, 1);
    }

    #[test]
    #[serial_test::serial]
    fn credentials_fall_back_to_environment() {
        std::env::set_var("LASTFM_API_KEY", "env-key");
        std::env::set_var("TWITCH_CLIENT_ID", "tw-id");
        std::env::set_var("TWITCH_CLIENT_SECRET", "tw-secret");

        let config = Config::default();
        assert_eq!(
            config.provider(Source::Lastfm).api_key.as_deref(),
            Some("env-key")
        );
        let igdb = config.provider(Source::Igdb);
        assert_eq!(igdb.client_id.as_deref(), Some("tw-id"));
        assert_eq!(igdb.client_secret.as_deref(), Some("tw-secret"));

        // File settings beat the environment.
        let config: Config = toml::from_str(
            r#"
            [providers.lastfm]
            api_key = "file-key"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.provider(Source::Lastfm).api_key.as_deref(),
            Some("file-key")
        );

        std::env::remove_var("LASTFM_API_KEY");
        std::env::remove_var("TWITCH_CLIENT_ID");
        std::env::remove_var("TWITCH_CLIENT_SECRET");
    }

    #[test]
    fn validation_rejects_broken_limits() {
        let config: Config = toml::from_str(
            r#"
            [providers.tmdb]
            max_requests = 0
            "#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());

        let config: Config = toml::from_str(
            r#"
            [providers.igdb]
            base_url = "not a url"
            "#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn load_config_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [relay]
            port = 9911

            [providers.google_books]
            api_key = "gb"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.relay.port, 9911);
        assert_eq!(
            config.provider(Source::GoogleBooks).api_key.as_deref(),
            Some("gb")
        );
    }
}
