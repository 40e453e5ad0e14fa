//! Error taxonomy for provider calls.
//!
//! Callers route on the variant, not on message text: transient failures
//! ([`ProviderError::is_retryable`]) may be retried, everything else is
//! surfaced as-is. Variants carry owned strings rather than source chains so
//! outcomes can be cloned to every caller coalesced onto one in-flight
//! request.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::media::Source;

/// HTTP statuses worth retrying: timeouts, throttling and transient
/// upstream failures.
pub const RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// A failed call to an external metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request never produced an HTTP response (DNS, connect, TLS,
    /// connection reset).
    #[error("{provider} request failed: {message}")]
    Transport { provider: Source, message: String },

    /// The provider answered with a non-success status.
    #[error("{provider} returned HTTP {status}")]
    UpstreamStatus { provider: Source, status: u16 },

    /// The response arrived but could not be decoded into the expected
    /// shape.
    #[error("{provider} returned a malformed response: {message}")]
    Malformed { provider: Source, message: String },

    /// The deadline elapsed while waiting for a rate-limit token or for the
    /// HTTP exchange to complete.
    #[error("{provider} call exceeded the {limit:?} deadline")]
    Timeout { provider: Source, limit: Duration },

    /// The adapter has no credentials and cannot make the call at all.
    #[error("{provider} is not configured: {message}")]
    NotConfigured { provider: Source, message: String },
}

impl ProviderError {
    /// Which provider the failure belongs to.
    pub fn provider(&self) -> Source {
        match self {
            ProviderError::Transport { provider, .. }
            | ProviderError::UpstreamStatus { provider, .. }
            | ProviderError::Malformed { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::NotConfigured { provider, .. } => *provider,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Timeouts and transport failures are transient by definition; upstream
    /// statuses are checked against [`RETRYABLE_STATUS`]. Malformed payloads
    /// and missing configuration never heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport { .. } | ProviderError::Timeout { .. } => true,
            ProviderError::UpstreamStatus { status, .. } => RETRYABLE_STATUS.contains(status),
            ProviderError::Malformed { .. } | ProviderError::NotConfigured { .. } => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry with jitter-free doubling backoff.
///
/// `max_attempts` counts the first try, so `1` disables retries entirely.
/// That is the default; providers opt in through their configured
/// `retry_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts the policy. The delay doubles after every failed attempt and is
/// never jittered, so tests can predict the schedule exactly.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    operation: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && err.is_retryable() => {
                warn!(
                    provider = %err.provider(),
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
