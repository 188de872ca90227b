//! Single-tier sliding window counter.

use std::collections::VecDeque;
use tracing::{trace, warn};

use super::clock::Timestamp;

/// A single quota tier backed by a queue of request timestamps.
///
/// The window origin is the oldest recorded request, which is how the remote
/// service counts. Expired timestamps are only dropped by [`update_history`],
/// which every reading or mutating operation calls first.
///
/// [`update_history`]: ScopeHistory::update_history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeHistory {
    /// Window length in seconds
    duration: u64,
    /// Maximum requests in any window
    limit: u64,
    /// Recorded request times, oldest first
    history: VecDeque<Timestamp>,
}

impl ScopeHistory {
    /// Create an empty scope.
    pub fn new(duration: u64, limit: u64) -> Self {
        Self {
            duration,
            limit,
            history: VecDeque::new(),
        }
    }

    /// Window length in seconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Maximum requests in any window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Number of recorded requests, including any not yet trimmed.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no requests are recorded.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The oldest recorded request.
    pub fn oldest(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }

    fn window(&self) -> i64 {
        i64::try_from(self.duration).unwrap_or(i64::MAX)
    }

    /// Drop every timestamp older than the window.
    pub fn update_history(&mut self, now: Timestamp) {
        let window = self.window();
        while let Some(&front) = self.history.front() {
            if now.saturating_sub(front) > window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Seconds until one more request fits in the window, 0 if it fits now.
    pub fn validate_request(&mut self, now: Timestamp) -> u64 {
        self.update_history(now);

        if (self.history.len() as u64) < self.limit {
            return 0;
        }

        let Some(front) = self.history.front().copied() else {
            // Zero limit: nothing ever fits, retry after a full window.
            return self.duration.max(1);
        };

        // After trimming `now - front <= window`, so this is never negative.
        let elapsed = now.saturating_sub(front).max(0);
        let wait = (self.window() - elapsed).max(0) as u64;

        // At exactly `elapsed == window` the oldest entry is still counted
        // until the next second.
        wait.max(1)
    }

    /// Record a request. Never blocks and never refuses.
    ///
    /// Timestamps earlier than the newest entry are recorded at the newest
    /// entry's time so the queue stays ordered.
    pub fn insert_request(&mut self, timestamp: Timestamp) {
        let timestamp = match self.history.back() {
            Some(&newest) if timestamp < newest => {
                trace!(timestamp, newest, "Clamping out-of-order timestamp");
                newest
            }
            _ => timestamp,
        };
        self.history.push_back(timestamp);
    }

    /// Reconcile against server-reported usage for this window.
    ///
    /// The server's limit and duration replace the local ones. Returns the
    /// residue, `local - server`, observed before correcting. Under-counting
    /// is backfilled at `now`, but never past the point where the scope is
    /// full: further entries would not change the wait.
    pub fn correct_history(
        &mut self,
        server_count: u64,
        server_limit: u64,
        server_duration: u64,
        now: Timestamp,
    ) -> i64 {
        self.update_history(now);

        let local = self.history.len() as u64;
        let residue = (local as i64).saturating_sub(i64::try_from(server_count).unwrap_or(i64::MAX));
        self.limit = server_limit;
        self.duration = server_duration;

        if residue > 0 {
            for _ in 0..residue {
                self.history.pop_front();
            }
        } else if residue < 0 {
            let unrecorded = residue.unsigned_abs();
            let backfill = unrecorded.min(server_limit.saturating_sub(local));
            warn!(
                unrecorded,
                backfill,
                local,
                server_count,
                duration = server_duration,
                "Server counted requests this tracker never recorded"
            );
            for _ in 0..backfill {
                self.insert_request(now);
            }
        }

        residue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Timestamp = 1_700_000_000;

    #[test]
    fn test_new_scope_allows() {
        let mut scope = ScopeHistory::new(10, 3);
        assert_eq!(scope.validate_request(T0), 0);
        assert!(scope.is_empty());
    }

    #[test]
    fn test_window_trimming() {
        let mut scope = ScopeHistory::new(10, 1);
        scope.insert_request(T0);

        assert!(scope.validate_request(T0 + 10) > 0);
        assert_eq!(scope.len(), 1);

        assert_eq!(scope.validate_request(T0 + 11), 0);
        assert!(scope.is_empty());
    }

    #[test]
    fn test_update_history_on_empty_is_noop() {
        let mut scope = ScopeHistory::new(10, 1);
        scope.update_history(T0);
        assert!(scope.is_empty());
    }

    #[test]
    fn test_limit_enforcement_wait() {
        let mut scope = ScopeHistory::new(120, 3);
        scope.insert_request(T0);
        scope.insert_request(T0 + 5);
        scope.insert_request(T0 + 7);

        // duration - (now - oldest) = 120 - 30
        assert_eq!(scope.validate_request(T0 + 30), 90);
        assert_eq!(scope.oldest(), Some(T0));
    }

    #[test]
    fn test_below_limit_allows() {
        let mut scope = ScopeHistory::new(1, 20);
        for _ in 0..19 {
            scope.insert_request(T0);
        }
        assert_eq!(scope.validate_request(T0), 0);
    }

    #[test]
    fn test_boundary_wait_is_positive() {
        let mut scope = ScopeHistory::new(10, 1);
        scope.insert_request(T0);
        assert_eq!(scope.validate_request(T0 + 10), 1);
    }

    #[test]
    fn test_zero_limit_waits_full_window() {
        let mut scope = ScopeHistory::new(30, 0);
        assert_eq!(scope.validate_request(T0), 30);
    }

    #[test]
    fn test_insert_past_limit_is_recorded() {
        let mut scope = ScopeHistory::new(10, 2);
        for _ in 0..5 {
            scope.insert_request(T0);
        }
        assert_eq!(scope.len(), 5);
        assert_eq!(scope.validate_request(T0 + 1), 9);
    }

    #[test]
    fn test_out_of_order_insert_is_clamped() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0 + 5);
        scope.insert_request(T0);
        scope.update_history(T0 + 15);
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn test_correct_history_idempotent() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0);
        scope.insert_request(T0 + 1);

        let residue = scope.correct_history(2, 5, 10, T0 + 2);
        assert_eq!(residue, 0);
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn test_correct_history_uses_trimmed_count() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0);
        scope.insert_request(T0 + 8);

        // The first entry has expired; the server only sees one.
        let residue = scope.correct_history(1, 5, 10, T0 + 12);
        assert_eq!(residue, 0);
        assert_eq!(scope.oldest(), Some(T0 + 8));
    }

    #[test]
    fn test_correct_history_drops_overcount() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0);
        scope.insert_request(T0 + 1);
        scope.insert_request(T0 + 2);

        let residue = scope.correct_history(1, 5, 10, T0 + 3);
        assert_eq!(residue, 2);
        assert_eq!(scope.len(), 1);
        assert_eq!(scope.oldest(), Some(T0 + 2));
    }

    #[test]
    fn test_correct_history_backfills_undercount() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0);
        scope.insert_request(T0);
        scope.insert_request(T0);

        let residue = scope.correct_history(5, 5, 10, T0 + 4);
        assert_eq!(residue, -2);
        assert_eq!(scope.len(), 5);

        // Full now; the oldest entry still decides the wait.
        assert_eq!(scope.validate_request(T0 + 4), 6);

        // The backfilled entries outlive the originals.
        scope.update_history(T0 + 11);
        assert_eq!(scope.len(), 2);
        assert_eq!(scope.validate_request(T0 + 11), 0);
    }

    #[test]
    fn test_correct_history_backfill_stops_when_full() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0);

        let residue = scope.correct_history(20_000_000, 5, 10, T0 + 1);
        assert_eq!(residue, 1 - 20_000_000);
        assert_eq!(scope.len(), 5);
        assert_eq!(scope.validate_request(T0 + 1), 9);
    }

    #[test]
    fn test_correct_history_no_backfill_when_already_full() {
        let mut scope = ScopeHistory::new(10, 2);
        scope.insert_request(T0);
        scope.insert_request(T0);
        scope.insert_request(T0);

        scope.correct_history(7, 2, 10, T0 + 1);
        assert_eq!(scope.len(), 3);
    }

    #[test]
    fn test_correct_history_adopts_server_quota() {
        let mut scope = ScopeHistory::new(10, 5);
        scope.insert_request(T0);

        scope.correct_history(1, 1, 60, T0 + 1);
        assert_eq!(scope.limit(), 1);
        assert_eq!(scope.duration(), 60);
        assert_eq!(scope.validate_request(T0 + 1), 59);
    }
}
