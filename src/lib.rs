//! Trailguard - In-Process Sliding-Window Rate Limiting
//!
//! This crate decides, per client key, whether a request fits in the budget
//! of admitted requests over a trailing time window. Client keys come from
//! forwarding headers or a caller-supplied extractor; state lives in memory
//! and is bounded by least-recently-used eviction and an optional sweeper.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod replay;
