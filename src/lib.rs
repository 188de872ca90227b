//! Regionpace - client-side rate-limit pacing
//!
//! This crate tracks the quotas a remote API enforces per region, per
//! application and per endpoint, using sliding windows keyed off the times of
//! recorded requests. It tells callers how long to wait before the next
//! request and reconciles its counts with the usage the server reports.

pub mod config;
pub mod error;
pub mod pacer;
pub mod ratelimit;
