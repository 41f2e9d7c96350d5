//! Sliding-window rate limiting and per-client state.

mod clock;
mod key;
mod limiter;
mod log;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{HeaderKeyExtractor, KeyExtractor, RequestMetadata, UNKNOWN_CLIENT};
pub use limiter::{RateLimiter, RateLimiterBuilder, DEFAULT_MAX_TRACKED_KEYS};
pub use log::RequestLog;
pub use sweeper::{spawn_configured_sweeper, spawn_sweeper, SweeperHandle};
pub use window::{RateLimitDecision, WindowConfig};
