//! Twitch client-credentials flow backing the IGDB adapter and the relay.
//!
//! Tokens are exchanged lazily on first use, cached in memory with their
//! expiry, and refreshed once they get close to expiring. Concurrent
//! callers serialize on the token slot, so a cold start performs exactly
//! one exchange no matter how many requests race for it.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ProviderError;
use crate::media::Source;

/// Refresh this far before the reported expiry so a token never dies
/// mid-request.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// App access token dispenser for one client id/secret pair.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        http: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
            timeout,
            cached: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Returns a valid access token, exchanging credentials when none is
    /// cached or the cached one is within [`EXPIRY_MARGIN`] of expiring.
    /// The exchange runs under the same deadline as any other outbound
    /// call; elapse surfaces as [`ProviderError::Timeout`].
    pub async fn bearer(&self) -> Result<String, ProviderError> {
        let mut slot = self.cached.lock().await;
        if let Some(token) = slot.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(exchanged) => exchanged?,
            Err(_) => {
                return Err(ProviderError::Timeout {
                    provider: Source::Igdb,
                    limit: self.timeout,
                })
            }
        };

        debug!(expires_in = token.expires_in, "exchanged client credentials");
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        *slot = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    async fn exchange(&self) -> Result<TokenResponse, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::Transport {
                provider: Source::Igdb,
                message: format!("token exchange failed: {err}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::UpstreamStatus {
                provider: Source::Igdb,
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|err| ProviderError::Malformed {
            provider: Source::Igdb,
            message: format!("token response: {err}"),
        })
    }
}
