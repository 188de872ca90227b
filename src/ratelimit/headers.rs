//! Server-reported quota usage.
//!
//! After every call the remote service reports each quota it enforces as a
//! pair of headers: the limits (`limit:duration,...`) and the current
//! counters for the same windows (`count:duration,...`).

use serde::Serialize;

use super::descriptor::parse_pairs;
use crate::error::{RegionPaceError, Result};

/// Header carrying the application-wide limits.
pub const APP_RATE_LIMIT: &str = "X-App-Rate-Limit";
/// Header carrying the application-wide counters.
pub const APP_RATE_LIMIT_COUNT: &str = "X-App-Rate-Limit-Count";
/// Header carrying the endpoint limits.
pub const METHOD_RATE_LIMIT: &str = "X-Method-Rate-Limit";
/// Header carrying the endpoint counters.
pub const METHOD_RATE_LIMIT_COUNT: &str = "X-Method-Rate-Limit-Count";

/// Authoritative usage of one window as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScopeUsage {
    /// Requests the server has counted in the current window
    pub count: u64,
    /// The server's limit for the window
    pub limit: u64,
    /// Window length in seconds
    pub duration: u64,
}

/// Pair a limits header with its counts header by window duration.
pub fn parse_usage(limits: &str, counts: &str) -> Result<Vec<ScopeUsage>> {
    let limits = parse_pairs(limits)?;
    let counts = parse_pairs(counts)?;

    limits
        .into_iter()
        .map(|(limit, duration)| -> Result<ScopeUsage> {
            let count = counts
                .iter()
                .find(|(_, d)| *d == duration)
                .map(|(count, _)| *count)
                .ok_or_else(|| {
                    RegionPaceError::Headers(format!("no count reported for the {}s window", duration))
                })?;
            Ok(ScopeUsage {
                count,
                limit,
                duration,
            })
        })
        .collect()
}

/// The rate-limit portion of one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Application-wide usage per window
    pub application: Vec<ScopeUsage>,
    /// Endpoint usage per window
    pub method: Vec<ScopeUsage>,
    /// Raw endpoint limits descriptor, used to create endpoint tiers
    pub method_limits: Option<String>,
}

impl RateLimitHeaders {
    /// Build from a header lookup supplied by the transport.
    ///
    /// A limits header without its counts header (or the reverse) is an
    /// error; a response carrying neither is simply empty.
    pub fn from_lookup<'a, F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let application = usage_from(&get, APP_RATE_LIMIT, APP_RATE_LIMIT_COUNT)?;
        let method = usage_from(&get, METHOD_RATE_LIMIT, METHOD_RATE_LIMIT_COUNT)?;

        Ok(Self {
            application,
            method,
            method_limits: get(METHOD_RATE_LIMIT).map(str::to_string),
        })
    }
}

fn usage_from<'a, F>(get: &F, limits_header: &str, counts_header: &str) -> Result<Vec<ScopeUsage>>
where
    F: Fn(&str) -> Option<&'a str>,
{
    match (get(limits_header), get(counts_header)) {
        (Some(limits), Some(counts)) => parse_usage(limits, counts),
        (None, None) => Ok(Vec::new()),
        (Some(_), None) => Err(RegionPaceError::Headers(format!(
            "{} present without {}",
            limits_header, counts_header
        ))),
        (None, Some(_)) => Err(RegionPaceError::Headers(format!(
            "{} present without {}",
            counts_header, limits_header
        ))),
    }
}
