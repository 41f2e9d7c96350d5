//! Background removal of idle client keys.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::limiter::RateLimiter;
use crate::config::LimiterSettings;
use crate::error::{Result, TrailguardError};

/// Handle to a running sweeper task.
///
/// Dropping the handle closes the shutdown channel, which stops the task
/// as soon as it is next polled.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "Key sweeper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that calls [`RateLimiter::sweep`] every `interval`.
///
/// The task holds only a weak reference and exits once the limiter is
/// dropped. A zero interval is rejected. Must be called from within a
/// Tokio runtime.
pub fn spawn_sweeper(limiter: &Arc<RateLimiter>, interval: Duration) -> Result<SweeperHandle> {
    if interval.is_zero() {
        return Err(TrailguardError::InvalidConfiguration(
            "sweep interval must be positive".to_string(),
        ));
    }

    let (tx, mut rx) = oneshot::channel();
    let limiter: Weak<RateLimiter> = Arc::downgrade(limiter);

    info!(interval_ms = interval.as_millis() as u64, "Starting key sweeper");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    let Some(limiter) = limiter.upgrade() else {
                        break;
                    };
                    let removed = limiter.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = limiter.key_count(), "Swept idle client keys");
                    }
                }
            }
        }

        info!("Key sweeper stopped");
    });

    Ok(SweeperHandle {
        shutdown: Some(tx),
        task,
    })
}

/// Spawn a sweeper when `sweep_interval_ms` is configured.
///
/// The settings are validated first, so a zero interval is reported as
/// [`TrailguardError::InvalidConfiguration`].
pub fn spawn_configured_sweeper(
    limiter: &Arc<RateLimiter>,
    settings: &LimiterSettings,
) -> Result<Option<SweeperHandle>> {
    settings.validate()?;
    settings
        .sweep_interval_ms
        .map(|ms| spawn_sweeper(limiter, Duration::from_millis(ms)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, WindowConfig};

    fn limiter_with_clock(window_ms: u64) -> (Arc<RateLimiter>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::builder(WindowConfig::new(window_ms, 10).unwrap())
            .clock(clock.clone())
            .build();
        (Arc::new(limiter), clock)
    }

    #[tokio::test]
    async fn test_sweeper_removes_idle_keys() {
        let (limiter, clock) = limiter_with_clock(100);
        limiter.check_key("a");
        limiter.check_key("b");
        assert_eq!(limiter.key_count(), 2);

        let handle = spawn_sweeper(&limiter, Duration::from_millis(20)).unwrap();

        clock.set(500);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(limiter.key_count(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_keeps_active_keys() {
        let (limiter, clock) = limiter_with_clock(1_000);
        let handle = spawn_sweeper(&limiter, Duration::from_millis(20)).unwrap();

        for step in 0..5 {
            clock.set(step * 100);
            limiter.check_key("active");
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert_eq!(limiter.key_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_configured_sweeper() {
        let (limiter, _clock) = limiter_with_clock(100);

        let settings = LimiterSettings::default();
        assert!(spawn_configured_sweeper(&limiter, &settings).unwrap().is_none());

        let settings = LimiterSettings {
            sweep_interval_ms: Some(10),
            ..LimiterSettings::default()
        };
        let handle = spawn_configured_sweeper(&limiter, &settings).unwrap().unwrap();
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (limiter, _clock) = limiter_with_clock(100);

        let err = spawn_sweeper(&limiter, Duration::ZERO).err().unwrap();
        assert!(matches!(err, TrailguardError::InvalidConfiguration(_)));

        let settings = LimiterSettings {
            sweep_interval_ms: Some(0),
            ..LimiterSettings::default()
        };
        let err = spawn_configured_sweeper(&limiter, &settings).err().unwrap();
        assert!(matches!(err, TrailguardError::InvalidConfiguration(_)));

        // Invalid window settings are reported before any task starts
        let settings = LimiterSettings {
            max_requests: crate::config::ConfigNumber::Integer(0),
            sweep_interval_ms: Some(10),
            ..LimiterSettings::default()
        };
        assert!(spawn_configured_sweeper(&limiter, &settings).is_err());
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_limiter_dropped() {
        let (limiter, _clock) = limiter_with_clock(100);
        let handle = spawn_sweeper(&limiter, Duration::from_millis(10)).unwrap();

        drop(limiter);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_sweeper() {
        let (limiter, clock) = limiter_with_clock(100);
        limiter.check_key("a");

        let handle = spawn_sweeper(&limiter, Duration::from_millis(10)).unwrap();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(30)).await;

        clock.set(500);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.key_count(), 1);
    }
}
