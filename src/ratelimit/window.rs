//! Window configuration and admission decisions.

use serde::Serialize;

use crate::error::{Result, TrailguardError};

/// Immutable sliding-window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowConfig {
    window_ms: u64,
    max_requests: u64,
}

impl WindowConfig {
    /// Create a window configuration.
    ///
    /// Both values must be positive; zero is rejected with
    /// [`TrailguardError::InvalidConfiguration`].
    pub fn new(window_ms: u64, max_requests: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(TrailguardError::InvalidConfiguration(
                "window_ms must be positive".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(TrailguardError::InvalidConfiguration(
                "max_requests must be positive".to_string(),
            ));
        }
        Ok(Self {
            window_ms,
            max_requests,
        })
    }

    /// Length of the trailing window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Maximum admitted requests per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Whether a timestamp recorded at `timestamp_ms` still counts at `now_ms`.
    ///
    /// A timestamp exactly `window_ms` old sits on the window start and has
    /// expired.
    #[inline]
    pub fn is_live(&self, timestamp_ms: u64, now_ms: u64) -> bool {
        timestamp_ms.saturating_add(self.window_ms) > now_ms
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request was admitted and recorded
    pub allowed: bool,
    /// Requests counted in the window after this decision
    pub count: u64,
    /// Admissions left in the current window
    pub remaining: u64,
    /// On denial, milliseconds until the oldest counted request expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}
