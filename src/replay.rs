//! Replay of recorded request traces through a limiter.
//!
//! A trace is plain text with one `<timestamp_ms> <client_key>` pair per
//! line. Blank lines and lines starting with `#` are ignored.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::LimiterSettings;
use crate::error::{Result, TrailguardError};
use crate::ratelimit::{ManualClock, RateLimitDecision, RateLimiter};

/// One request from a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// 1-based line number in the source
    pub line: usize,
    pub timestamp_ms: u64,
    pub key: String,
}

/// Decision recorded for one trace entry.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub timestamp_ms: u64,
    pub key: String,
    #[serde(flatten)]
    pub decision: RateLimitDecision,
}

/// Totals for a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub admitted: usize,
    pub denied: usize,
    pub distinct_keys: usize,
}

/// Parse a trace from a string.
pub fn parse_trace(input: &str) -> Result<Vec<TraceEntry>> {
    let mut entries = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let mut parts = text.split_whitespace();
        let timestamp = parts.next().ok_or_else(|| TrailguardError::Trace {
            line,
            reason: "missing timestamp".to_string(),
        })?;
        let timestamp_ms = timestamp.parse::<u64>().map_err(|_| TrailguardError::Trace {
            line,
            reason: format!("invalid timestamp {:?}", timestamp),
        })?;
        let key = parts.next().ok_or_else(|| TrailguardError::Trace {
            line,
            reason: "missing client key".to_string(),
        })?;
        if parts.next().is_some() {
            return Err(TrailguardError::Trace {
                line,
                reason: "unexpected trailing fields".to_string(),
            });
        }

        entries.push(TraceEntry {
            line,
            timestamp_ms,
            key: key.to_string(),
        });
    }

    Ok(entries)
}

/// Read and parse a trace file.
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Vec<TraceEntry>> {
    let path = path.as_ref();
    info!(path = %path.display(), "Loading request trace");
    parse_trace(&std::fs::read_to_string(path)?)
}

/// Drives a limiter with trace timestamps instead of the wall clock.
pub struct Replayer {
    limiter: RateLimiter,
    clock: Arc<ManualClock>,
}

impl Replayer {
    /// Create a replayer using the limiter settings.
    pub fn new(settings: &LimiterSettings) -> Result<Self> {
        let window = settings.validate()?;
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::builder(window)
            .clock(clock.clone())
            .max_tracked_keys(settings.max_tracked_keys)
            .build();
        Ok(Self { limiter, clock })
    }

    /// Run one entry through the limiter.
    pub fn step(&self, entry: &TraceEntry) -> ReplayOutcome {
        self.clock.set(entry.timestamp_ms);
        let decision = self.limiter.decide_key(&entry.key);
        debug!(
            line = entry.line,
            key = %entry.key,
            allowed = decision.allowed,
            "Replayed trace entry"
        );
        ReplayOutcome {
            timestamp_ms: entry.timestamp_ms,
            key: entry.key.clone(),
            decision,
        }
    }

    /// Run every entry, returning per-entry outcomes and totals.
    pub fn run(&self, entries: &[TraceEntry]) -> (Vec<ReplayOutcome>, ReplaySummary) {
        let mut keys = HashSet::new();
        let mut summary = ReplaySummary::default();

        let outcomes: Vec<ReplayOutcome> = entries
            .iter()
            .map(|entry| {
                keys.insert(entry.key.as_str());
                let outcome = self.step(entry);
                if outcome.decision.allowed {
                    summary.admitted += 1;
                } else {
                    summary.denied += 1;
                }
                outcome
            })
            .collect();

        summary.distinct_keys = keys.len();
        (outcomes, summary)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
