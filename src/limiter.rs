//! Token-bucket rate limiting for outbound provider calls.
//!
//! Each provider gets one bucket sized from its published quota (for
//! example 40 requests per 10 seconds for TMDB, 4 per second for IGDB).
//! Tokens refill continuously rather than in interval steps, so a burst
//! that drains the bucket recovers smoothly instead of all at once.
//!
//! Callers that find a token available are granted synchronously. Callers
//! that do not are queued and woken in arrival order; a fractional token
//! balance is carried across refills so no capacity is lost to rounding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep_until, Instant};

/// One provider's token bucket.
///
/// `acquire` is cancel-safe: a caller dropped while queued (for example by
/// an enclosing `tokio::time::timeout`) releases its queue slot without
/// consuming a token.
pub struct RateLimiter {
    max_tokens: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    /// Tokio mutexes wake waiters in FIFO order, which is exactly the queue
    /// discipline wanted here: the first caller to block is the first to
    /// drain a refilled token.
    queue: AsyncMutex<()>,
    /// Number of callers currently queued. While it is non-zero the fast
    /// path stands down so late arrivals cannot overtake the queue.
    waiting: AtomicUsize,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Builds a bucket allowing `max_requests` per `interval`. The bucket
    /// starts full.
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        let max_tokens = f64::from(max_requests.max(1));
        let interval_secs = interval.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            max_tokens,
            refill_per_sec: max_tokens / interval_secs,
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
            queue: AsyncMutex::new(()),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        if self.try_acquire() {
            return;
        }
        let _slot = WaitSlot::register(&self.waiting);
        let _turn = self.queue.lock().await;
        loop {
            let wake_at = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                bucket.last_refill + Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            sleep_until(wake_at).await;
        }
    }

    /// Consumes a token if one is available right now. Returns `false` when
    /// the bucket is empty or other callers are already queued.
    pub fn try_acquire(&self) -> bool {
        if self.waiting.load(Ordering::Acquire) > 0 {
            return false;
        }
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token balance, refreshed to now. Fractional while refilling.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
            bucket.last_refill = now;
        }
    }
}

/// Decrements the waiter count even if the queued future is dropped.
struct WaitSlot<'a>(&'a AtomicUsize);

impl<'a> WaitSlot<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
