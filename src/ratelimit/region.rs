//! Per-region quota hierarchy.
//!
//! A region tracks the application-wide tiers shared by every endpoint, plus
//! one list of tiers per endpoint. Endpoint tiers are learned lazily from the
//! limits descriptor the server returns with the first response.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::clock::{Clock, Timestamp};
use super::descriptor::{parse_descriptor, LimitTier};
use super::headers::{RateLimitHeaders, ScopeUsage};
use super::scope::ScopeHistory;
use crate::error::{RegionPaceError, Result};

/// Ordering policy for the application hierarchy.
///
/// Tiers are consulted starting from the last one supplied. Servers report
/// tiers shortest window first, so the longest window is checked first.
fn application_priority(tiers: &[LimitTier]) -> impl Iterator<Item = &LimitTier> {
    tiers.iter().rev()
}

/// How server-reported windows line up with a stored list of tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportOrder {
    /// Same order as stored (endpoint tiers).
    Stored,
    /// Reverse of the stored order (application tiers, see `application_priority`).
    Reversed,
}

/// Quota state for one network region.
///
/// Not internally synchronised: callers sharing a region across tasks must
/// hold one lock across validate, send and insert, or two callers can both
/// see a free slot. [`Pacer`](crate::pacer::Pacer) does this.
#[derive(Debug)]
pub struct RegionHistory {
    name: String,
    application_hierarchy: Vec<ScopeHistory>,
    method_queues: HashMap<String, Vec<ScopeHistory>>,
    clock: Arc<dyn Clock>,
}

impl RegionHistory {
    /// Build a region from parallel arrays of application limits and durations.
    ///
    /// Each application tier is seeded with one request at `server_time`.
    pub fn init_region(
        name: impl Into<String>,
        limits: &[u64],
        durations: &[u64],
        server_time: Timestamp,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        if limits.len() != durations.len() {
            return Err(RegionPaceError::Region(format!(
                "region {}: {} limits but {} durations",
                name,
                limits.len(),
                durations.len()
            )));
        }

        let tiers: Vec<LimitTier> = limits
            .iter()
            .zip(durations)
            .map(|(&limit, &duration)| LimitTier { limit, duration })
            .collect();
        Ok(Self::from_tiers(name, &tiers, server_time, clock))
    }

    /// Build a region from application tiers in server order.
    pub fn from_tiers(
        name: impl Into<String>,
        tiers: &[LimitTier],
        server_time: Timestamp,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let application_hierarchy = application_priority(tiers)
            .map(|tier| {
                let mut scope = ScopeHistory::new(tier.duration, tier.limit);
                scope.insert_request(server_time);
                scope
            })
            .collect();

        Self {
            name: name.into(),
            application_hierarchy,
            method_queues: HashMap::new(),
            clock,
        }
    }

    /// Build a region from an application limits descriptor.
    pub fn from_descriptor(
        name: impl Into<String>,
        application_limits: &str,
        server_time: Timestamp,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tiers = parse_descriptor(application_limits)?;
        Ok(Self::from_tiers(name, &tiers, server_time, clock))
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current time according to the region's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Application tiers in the order they are consulted.
    pub fn application_scopes(&self) -> &[ScopeHistory] {
        &self.application_hierarchy
    }

    /// Mutable access to the application tiers.
    pub fn application_scopes_mut(&mut self) -> &mut [ScopeHistory] {
        &mut self.application_hierarchy
    }

    /// Tiers of an endpoint, if it has been seen.
    pub fn endpoint_scopes(&self, endpoint: &str) -> Option<&[ScopeHistory]> {
        self.method_queues.get(endpoint).map(Vec::as_slice)
    }

    /// Mutable access to the tiers of an endpoint, if it has been seen.
    pub fn endpoint_scopes_mut(&mut self, endpoint: &str) -> Option<&mut [ScopeHistory]> {
        self.method_queues.get_mut(endpoint).map(Vec::as_mut_slice)
    }

    /// Number of endpoints with learned tiers.
    pub fn endpoint_count(&self) -> usize {
        self.method_queues.len()
    }

    /// Trim every tier of the region.
    pub fn update_scopes(&mut self) {
        let now = self.clock.now();
        for scope in &mut self.application_hierarchy {
            scope.update_history(now);
        }
        for scopes in self.method_queues.values_mut() {
            for scope in scopes {
                scope.update_history(now);
            }
        }
    }

    /// Seconds to wait before a request to `endpoint` may be sent.
    ///
    /// The first blocking application tier wins; later ones are not
    /// consulted. Endpoint tiers are all consulted and the strictest wins.
    /// An endpoint with no learned tiers does not constrain the request.
    pub fn validate_request(&mut self, endpoint: &str) -> u64 {
        let now = self.clock.now();

        let application_wait = self
            .application_hierarchy
            .iter_mut()
            .map(|scope| scope.validate_request(now))
            .find(|&wait| wait != 0)
            .unwrap_or(0);

        let endpoint_wait = self
            .method_queues
            .get_mut(endpoint)
            .map(|scopes| {
                scopes
                    .iter_mut()
                    .map(|scope| scope.validate_request(now))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        let wait = application_wait.max(endpoint_wait);
        trace!(
            region = %self.name,
            endpoint,
            application_wait,
            endpoint_wait,
            "Validated request"
        );
        wait
    }

    /// Record a sent request.
    ///
    /// The first request to an endpoint creates its tiers from
    /// `limits_descriptor`; later requests ignore the descriptor. A malformed
    /// descriptor for a new endpoint is rejected before anything is recorded.
    pub fn insert_request(
        &mut self,
        timestamp: Timestamp,
        endpoint: &str,
        limits_descriptor: &str,
    ) -> Result<()> {
        let new_tiers = if self.method_queues.contains_key(endpoint) {
            None
        } else {
            Some(parse_descriptor(limits_descriptor)?)
        };

        self.update_scopes();

        for scope in &mut self.application_hierarchy {
            scope.insert_request(timestamp);
        }

        match new_tiers {
            None => {
                if let Some(scopes) = self.method_queues.get_mut(endpoint) {
                    for scope in scopes {
                        scope.insert_request(timestamp);
                    }
                }
            }
            Some(tiers) => {
                debug!(
                    region = %self.name,
                    endpoint,
                    limits = limits_descriptor,
                    "Creating endpoint tiers"
                );
                let scopes = tiers
                    .iter()
                    .map(|tier| {
                        let mut scope = ScopeHistory::new(tier.duration, tier.limit);
                        scope.insert_request(timestamp);
                        scope
                    })
                    .collect();
                self.method_queues.insert(endpoint.to_string(), scopes);
            }
        }

        Ok(())
    }

    /// Apply server-reported application usage to the matching tiers.
    pub fn reconcile_application(&mut self, usage: &[ScopeUsage]) {
        let now = self.clock.now();
        correct_matching(
            &self.name,
            &mut self.application_hierarchy,
            usage,
            ReportOrder::Reversed,
            now,
        );
    }

    /// Apply server-reported endpoint usage to the matching tiers.
    ///
    /// Usage for an endpoint with no learned tiers is ignored.
    pub fn reconcile_endpoint(&mut self, endpoint: &str, usage: &[ScopeUsage]) {
        let now = self.clock.now();
        if let Some(scopes) = self.method_queues.get_mut(endpoint) {
            correct_matching(&self.name, scopes, usage, ReportOrder::Stored, now);
        }
    }

    /// Apply all usage reported with one response.
    pub fn reconcile(&mut self, endpoint: &str, headers: &RateLimitHeaders) {
        self.reconcile_application(&headers.application);
        self.reconcile_endpoint(endpoint, &headers.method);
    }

    /// Point-in-time view of every tier.
    pub fn snapshot(&mut self) -> RegionSnapshot {
        let now = self.clock.now();
        let application = self
            .application_hierarchy
            .iter_mut()
            .map(|scope| ScopeSnapshot::capture(scope, now))
            .collect();

        let mut endpoints: Vec<EndpointSnapshot> = self
            .method_queues
            .iter_mut()
            .map(|(endpoint, scopes)| EndpointSnapshot {
                endpoint: endpoint.clone(),
                scopes: scopes
                    .iter_mut()
                    .map(|scope| ScopeSnapshot::capture(scope, now))
                    .collect(),
            })
            .collect();
        endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        RegionSnapshot {
            region: self.name.clone(),
            taken_at: now,
            application,
            endpoints,
        }
    }
}

/// Reconcile each reported window with its local tier.
///
/// When the server reports as many windows as are tracked, they are paired by
/// position, so a changed limit or duration is adopted. Otherwise each report
/// goes to the first unclaimed tier with the same duration.
fn correct_matching(
    region: &str,
    scopes: &mut [ScopeHistory],
    usage: &[ScopeUsage],
    order: ReportOrder,
    now: Timestamp,
) {
    let tracked = scopes.len();
    if usage.len() == tracked {
        for (position, reported) in usage.iter().enumerate() {
            let index = match order {
                ReportOrder::Stored => position,
                ReportOrder::Reversed => tracked - 1 - position,
            };
            scopes[index].correct_history(reported.count, reported.limit, reported.duration, now);
        }
        return;
    }

    let mut claimed = vec![false; tracked];
    for reported in usage {
        let slot = (0..tracked)
            .find(|&index| !claimed[index] && scopes[index].duration() == reported.duration);
        match slot {
            Some(index) => {
                claimed[index] = true;
                scopes[index].correct_history(reported.count, reported.limit, reported.duration, now);
            }
            None => {
                debug!(
                    region,
                    duration = reported.duration,
                    "No tracked tier for reported window"
                );
            }
        }
    }
}

/// State of one tier at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeSnapshot {
    pub limit: u64,
    pub duration: u64,
    pub in_window: usize,
    pub wait_secs: u64,
}

impl ScopeSnapshot {
    fn capture(scope: &mut ScopeHistory, now: Timestamp) -> Self {
        let wait_secs = scope.validate_request(now);
        Self {
            limit: scope.limit(),
            duration: scope.duration(),
            in_window: scope.len(),
            wait_secs,
        }
    }
}

/// State of one endpoint's tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    pub endpoint: String,
    pub scopes: Vec<ScopeSnapshot>,
}

/// State of a whole region, endpoints sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionSnapshot {
    pub region: String,
    pub taken_at: Timestamp,
    pub application: Vec<ScopeSnapshot>,
    pub endpoints: Vec<EndpointSnapshot>,
}
