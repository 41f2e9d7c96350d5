//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::config::LimiterSettings;
use crate::error::Result;

use super::clock::{Clock, SystemClock};
use super::key::{normalize_key, HeaderKeyExtractor, KeyExtractor, RequestMetadata};
use super::log::RequestLog;
use super::window::{RateLimitDecision, WindowConfig};

/// Default bound on tracked client keys.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Sliding-window rate limiter keyed by client.
///
/// Each admitted request is recorded with its timestamp; a request is denied
/// once `max_requests` admissions fall inside the trailing `window_ms`.
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    window: WindowConfig,
    log: RequestLog,
    extractor: Arc<dyn KeyExtractor>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter with the default header extractor and system clock.
    pub fn new(window_ms: u64, max_requests: u64) -> Result<Self> {
        Ok(Self::builder(WindowConfig::new(window_ms, max_requests)?).build())
    }

    /// Start building a limiter for the given window.
    pub fn builder(window: WindowConfig) -> RateLimiterBuilder {
        RateLimiterBuilder::new(window)
    }

    /// Build a limiter from configuration settings.
    pub fn from_settings(settings: &LimiterSettings) -> Result<Self> {
        let window = settings.validate()?;
        Ok(Self::builder(window)
            .key_extractor(HeaderKeyExtractor::from_settings(settings))
            .max_tracked_keys(settings.max_tracked_keys)
            .build())
    }

    /// Decide whether the request may proceed, recording it if admitted.
    ///
    /// Fails only when a custom key extractor fails.
    pub fn check(&self, request: &RequestMetadata) -> Result<bool> {
        Ok(self.decide(request)?.allowed)
    }

    /// Like [`check`](Self::check) but returns the full decision.
    pub fn decide(&self, request: &RequestMetadata) -> Result<RateLimitDecision> {
        let key = self.extractor.extract(request)?;
        Ok(self.decide_key_at(&key, self.clock.now_ms()))
    }

    /// Check an already extracted client key at the current time.
    pub fn check_key(&self, key: &str) -> bool {
        self.decide_key(key).allowed
    }

    /// Decide for an already extracted client key at the current time.
    pub fn decide_key(&self, key: &str) -> RateLimitDecision {
        self.decide_key_at(key, self.clock.now_ms())
    }

    /// Check a client key at an explicit timestamp.
    pub fn check_key_at(&self, key: &str, now_ms: u64) -> bool {
        self.decide_key_at(key, now_ms).allowed
    }

    /// Decide for a client key at an explicit timestamp.
    pub fn decide_key_at(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        let key = normalize_key(key);
        let decision = self.log.record(key, now_ms, &self.window);

        if decision.allowed {
            trace!(
                key = %key,
                count = decision.count,
                remaining = decision.remaining,
                "Request admitted"
            );
        } else {
            debug!(
                key = %key,
                count = decision.count,
                limit = self.window.max_requests(),
                retry_after_ms = ?decision.retry_after_ms,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Admissions currently counted for `key`. Does not prune.
    pub fn current_count(&self, key: &str) -> u64 {
        self.log.live_count(key, self.clock.now_ms(), &self.window)
    }

    /// Drop every key whose window is empty. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.log.sweep(self.clock.now_ms(), &self.window)
    }

    /// Forget the state of one client key.
    pub fn remove(&self, key: &str) -> bool {
        self.log.remove(key)
    }

    /// Clear all tracked keys.
    pub fn clear(&self) {
        self.log.clear();
    }

    /// Get the number of tracked client keys.
    pub fn key_count(&self) -> usize {
        self.log.len()
    }

    /// The window this limiter enforces.
    pub fn window(&self) -> WindowConfig {
        self.window
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("keys", &self.log.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    window: WindowConfig,
    extractor: Arc<dyn KeyExtractor>,
    clock: Arc<dyn Clock>,
    max_tracked_keys: Option<usize>,
}

impl RateLimiterBuilder {
    fn new(window: WindowConfig) -> Self {
        Self {
            window,
            extractor: Arc::new(HeaderKeyExtractor::default()),
            clock: Arc::new(SystemClock),
            max_tracked_keys: Some(DEFAULT_MAX_TRACKED_KEYS),
        }
    }

    /// Replace the default header-based key extractor.
    pub fn key_extractor<E: KeyExtractor + 'static>(mut self, extractor: E) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Use a custom time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound the number of tracked keys; `None` tracks without limit.
    pub fn max_tracked_keys(mut self, max_tracked_keys: Option<usize>) -> Self {
        self.max_tracked_keys = max_tracked_keys;
        self
    }

    pub fn build(self) -> RateLimiter {
        info!(
            window_ms = self.window.window_ms(),
            max_requests = self.window.max_requests(),
            max_tracked_keys = ?self.max_tracked_keys,
            "Rate limiter initialized"
        );

        RateLimiter {
            window: self.window,
            log: RequestLog::new(self.max_tracked_keys),
            extractor: self.extractor,
            clock: self.clock,
        }
    }
}
