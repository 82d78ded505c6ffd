//! Replay protection.
//!
//! Every signed frame carries a fresh nonce and a timestamp. A frame replays
//! if its nonce was already seen, or its timestamp sits outside the accepted
//! window (too old to track, or implausibly far in the future). The seen-set
//! is bounded by opportunistic cleanup.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use wopr_proto::now_ms;

/// Frames older than this are refused outright (we no longer track their nonces).
pub const DEFAULT_MAX_AGE_MS: i64 = 5 * 60 * 1000;
/// Allowed clock skew into the future.
pub const DEFAULT_MAX_SKEW_MS: i64 = 30 * 1000;
/// Cleanup threshold for the seen-set.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

pub struct ReplayProtector {
    max_age_ms: i64,
    max_skew_ms: i64,
    max_entries: usize,
    seen: Mutex<HashMap<String, i64>>,
}

impl Default for ReplayProtector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_MS, DEFAULT_MAX_SKEW_MS, DEFAULT_MAX_ENTRIES)
    }
}

impl ReplayProtector {
    pub fn new(max_age_ms: i64, max_skew_ms: i64, max_entries: usize) -> Self {
        Self {
            max_age_ms,
            max_skew_ms,
            max_entries,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Accept and record a (nonce, ts) pair, or refuse it.
    pub fn check(&self, nonce: &str, ts: i64) -> bool {
        self.check_at(nonce, ts, now_ms())
    }

    fn check_at(&self, nonce: &str, ts: i64, now: i64) -> bool {
        if ts < now - self.max_age_ms || ts > now + self.max_skew_ms {
            return false;
        }
        let mut seen = self.seen.lock();
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), ts);
        if seen.len() > self.max_entries {
            let cutoff = now - self.max_age_ms;
            seen.retain(|_, &mut t| t > cutoff);
            debug!(remaining = seen.len(), "replay set pruned");
        }
        true
    }

    /// Periodic housekeeping: drop nonces too old to ever replay.
    pub fn cleanup(&self) {
        let cutoff = now_ms() - self.max_age_ms;
        self.seen.lock().retain(|_, &mut t| t > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_nonce_accepted_replay_refused() {
        let rp = ReplayProtector::default();
        assert!(rp.check_at("n1", 1_000_000, 1_000_000));
        assert!(!rp.check_at("n1", 1_000_000, 1_000_100));
        assert!(rp.check_at("n2", 1_000_000, 1_000_100));
    }

    #[test]
    fn stale_timestamp_refused() {
        let rp = ReplayProtector::default();
        let now = 10_000_000;
        assert!(!rp.check_at("old", now - DEFAULT_MAX_AGE_MS - 1, now));
        assert!(rp.check_at("edge", now - DEFAULT_MAX_AGE_MS + 1, now));
    }

    #[test]
    fn future_timestamp_refused() {
        let rp = ReplayProtector::default();
        let now = 10_000_000;
        assert!(!rp.check_at("future", now + DEFAULT_MAX_SKEW_MS + 1, now));
        assert!(rp.check_at("skewed", now + DEFAULT_MAX_SKEW_MS - 1, now));
    }

    #[test]
    fn seen_set_stays_bounded() {
        let rp = ReplayProtector::new(DEFAULT_MAX_AGE_MS, DEFAULT_MAX_SKEW_MS, 100);
        let now = 10_000_000;
        // Age out the first half as the second half arrives.
        for i in 0..200i64 {
            let ts = now + i * (DEFAULT_MAX_AGE_MS / 50);
            assert!(rp.check_at(&format!("n{i}"), ts, ts));
        }
        assert!(rp.seen.lock().len() <= 101);
    }
}
