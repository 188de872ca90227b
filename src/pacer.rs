//! Serialised access to region trackers for concurrent callers.
//!
//! A [`RegionHistory`] answers "how long until I may send", but the answer is
//! only good while nobody else sends. The pacer keeps one async mutex per
//! region and hands out a [`RegionPermit`] once the wait reaches zero; the
//! permit holds the lock while the request is in flight and until it is
//! recorded.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::config::{PacingConfig, RegionPaceConfig};
use crate::error::{RegionPaceError, Result};
use crate::ratelimit::{Clock, RateLimitHeaders, RegionHistory, RegionSnapshot, Timestamp};

/// Registry of region trackers shared by request-issuing tasks.
pub struct Pacer {
    /// Region trackers indexed by region name
    regions: DashMap<String, Arc<Mutex<RegionHistory>>>,
    /// Clock used for new regions and recorded requests
    clock: Arc<dyn Clock>,
    /// Longest single sleep before quotas are re-checked
    max_wait: Duration,
}

impl Pacer {
    /// Create an empty pacer.
    pub fn new(clock: Arc<dyn Clock>, pacing: &PacingConfig) -> Self {
        Self {
            regions: DashMap::new(),
            clock,
            max_wait: Duration::from_secs(pacing.max_wait_secs.max(1)),
        }
    }

    /// Create a pacer with every configured region, seeded at the current time.
    pub fn from_config(config: &RegionPaceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let pacer = Self::new(clock, &config.pacing);
        let now = pacer.clock.now();
        for (name, region) in &config.regions {
            let tiers = region.tiers()?;
            pacer.add_region(RegionHistory::from_tiers(name.clone(), &tiers, now, pacer.clock.clone()));
        }
        info!(regions = pacer.region_count(), "Pacer initialized");
        Ok(pacer)
    }

    /// Register a region, replacing any tracker with the same name.
    pub fn add_region(&self, region: RegionHistory) {
        let name = region.name().to_string();
        self.regions.insert(name, Arc::new(Mutex::new(region)));
    }

    /// Number of registered regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn region(&self, name: &str) -> Result<Arc<Mutex<RegionHistory>>> {
        self.regions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegionPaceError::Region(format!("Unknown region: {}", name)))
    }

    /// Wait until a request to `endpoint` in `region` may be sent.
    ///
    /// The region stays locked until the returned permit is dropped, so other
    /// callers of the same region queue behind it.
    pub async fn acquire(&self, region: &str, endpoint: &str) -> Result<RegionPermit> {
        let tracker = self.region(region)?;
        let mut guard = tracker.lock_owned().await;

        loop {
            let wait = guard.validate_request(endpoint);
            if wait == 0 {
                break;
            }
            let sleep = Duration::from_secs(wait).min(self.max_wait);
            debug!(region, endpoint, wait, "Rate limited, sleeping");
            tokio::time::sleep(sleep).await;
        }

        Ok(RegionPermit {
            guard,
            endpoint: endpoint.to_string(),
        })
    }

    /// Point-in-time view of a region.
    pub async fn snapshot(&self, region: &str) -> Result<RegionSnapshot> {
        let tracker = self.region(region)?;
        let mut guard = tracker.lock().await;
        Ok(guard.snapshot())
    }
}

/// Exclusive access to a region, granted once a request may be sent.
pub struct RegionPermit {
    guard: OwnedMutexGuard<RegionHistory>,
    endpoint: String,
}

impl RegionPermit {
    /// The endpoint this permit was granted for.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Record the request at the current time.
    pub fn record(&mut self, limits_descriptor: &str) -> Result<()> {
        let now = self.guard.now();
        self.record_at(now, limits_descriptor)
    }

    /// Record the request at a server-reported time.
    pub fn record_at(&mut self, timestamp: Timestamp, limits_descriptor: &str) -> Result<()> {
        self.guard
            .insert_request(timestamp, &self.endpoint, limits_descriptor)
    }

    /// Record the request from the response headers and reconcile usage.
    ///
    /// A response without endpoint limits only counts against the
    /// application tiers when the endpoint is already known.
    pub fn complete(&mut self, timestamp: Timestamp, headers: &RateLimitHeaders) -> Result<()> {
        match headers.method_limits.as_deref() {
            Some(limits) => self.record_at(timestamp, limits)?,
            None => {
                if self.guard.endpoint_scopes(&self.endpoint).is_none() {
                    return Err(RegionPaceError::Headers(format!(
                        "no endpoint limits reported for new endpoint {}",
                        self.endpoint
                    )));
                }
                self.record_at(timestamp, "")?;
            }
        }
        self.guard.reconcile(&self.endpoint, headers);
        Ok(())
    }
}
