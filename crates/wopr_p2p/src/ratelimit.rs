//! Per-peer sliding-window rate limiting with post-block cooldown.
//!
//! Four named limit classes gate the responder paths; a peer that trips a
//! class is blocked for that class until `blocked_until`, and the block is
//! never extended or reset by further attempts while it runs.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::warn;

use wopr_proto::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    /// Inbound connections (hello frames).
    Connections,
    /// Invite claim attempts.
    Claims,
    /// Inject requests.
    Injects,
    /// Unparseable, unsigned, replayed, or tampered frames.
    InvalidMessages,
}

impl LimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Connections => "connections",
            LimitClass::Claims => "claims",
            LimitClass::Injects => "injects",
            LimitClass::InvalidMessages => "invalidMessages",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub window_ms: i64,
    pub max_requests: usize,
    pub block_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub connections: LimitConfig,
    pub claims: LimitConfig,
    pub injects: LimitConfig,
    pub invalid_messages: LimitConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            connections: LimitConfig { window_ms: 60_000, max_requests: 10, block_ms: 300_000 },
            claims: LimitConfig { window_ms: 60_000, max_requests: 5, block_ms: 300_000 },
            injects: LimitConfig { window_ms: 1_000, max_requests: 10, block_ms: 60_000 },
            invalid_messages: LimitConfig { window_ms: 60_000, max_requests: 3, block_ms: 600_000 },
        }
    }
}

impl RateLimitConfig {
    fn for_class(&self, class: LimitClass) -> LimitConfig {
        match class {
            LimitClass::Connections => self.connections,
            LimitClass::Claims => self.claims,
            LimitClass::Injects => self.injects,
            LimitClass::InvalidMessages => self.invalid_messages,
        }
    }
}

#[derive(Default)]
struct PeerWindow {
    hits: VecDeque<i64>,
    blocked_until: Option<i64>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, LimitClass), PeerWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or refuse one request from `peer` in `class`.
    pub fn check(&self, peer: &str, class: LimitClass) -> bool {
        self.check_at(peer, class, now_ms())
    }

    fn check_at(&self, peer: &str, class: LimitClass, now: i64) -> bool {
        let limit = self.config.for_class(class);
        let mut windows = self.windows.lock();
        let window = windows
            .entry((peer.to_string(), class))
            .or_insert_with(PeerWindow::default);

        // An active block refuses without touching counters, so hammering
        // during cooldown cannot extend it.
        if let Some(blocked_until) = window.blocked_until {
            if now < blocked_until {
                return false;
            }
            window.blocked_until = None;
        }

        while window.hits.front().is_some_and(|&t| t <= now - limit.window_ms) {
            window.hits.pop_front();
        }

        if window.hits.len() >= limit.max_requests {
            window.blocked_until = Some(now + limit.block_ms);
            warn!(peer, class = class.as_str(), until = now + limit.block_ms, "rate limit tripped");
            return false;
        }

        window.hits.push_back(now);
        true
    }

    /// Whether `peer` currently sits in a block for `class`, without
    /// recording an attempt.
    pub fn is_blocked(&self, peer: &str, class: LimitClass) -> bool {
        let now = now_ms();
        self.windows
            .lock()
            .get(&(peer.to_string(), class))
            .and_then(|w| w.blocked_until)
            .is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn admits_up_to_limit_then_blocks() {
        let rl = limiter();
        for i in 0..10 {
            assert!(rl.check_at("peer", LimitClass::Connections, 1_000 + i), "hit {i}");
        }
        assert!(!rl.check_at("peer", LimitClass::Connections, 1_011));
        // Blocked for 300s from the trip.
        assert!(!rl.check_at("peer", LimitClass::Connections, 1_011 + 299_000));
        assert!(rl.check_at("peer", LimitClass::Connections, 1_011 + 301_000));
    }

    #[test]
    fn block_is_not_extended_by_retries() {
        let rl = limiter();
        for i in 0..3 {
            rl.check_at("peer", LimitClass::InvalidMessages, 1_000 + i);
        }
        // Trip at t=2000: blocked until 602_000.
        assert!(!rl.check_at("peer", LimitClass::InvalidMessages, 2_000));
        for t in (3_000..600_000).step_by(120_000) {
            assert!(!rl.check_at("peer", LimitClass::InvalidMessages, t));
        }
        assert!(rl.check_at("peer", LimitClass::InvalidMessages, 603_000));
    }

    #[test]
    fn window_slides() {
        let rl = limiter();
        for i in 0..10 {
            assert!(rl.check_at("peer", LimitClass::Injects, 1_000 + i * 10));
        }
        // Window is 1s for injects: old hits fall out.
        assert!(rl.check_at("peer", LimitClass::Injects, 2_500));
    }

    #[test]
    fn peers_and_classes_are_independent() {
        let rl = limiter();
        for _ in 0..5 {
            assert!(rl.check_at("a", LimitClass::Claims, 1_000));
        }
        assert!(!rl.check_at("a", LimitClass::Claims, 1_001));
        assert!(rl.check_at("b", LimitClass::Claims, 1_001));
        assert!(rl.check_at("a", LimitClass::Connections, 1_001));
    }

    #[test]
    fn is_blocked_reports_without_recording() {
        let rl = limiter();
        assert!(!rl.is_blocked("peer", LimitClass::InvalidMessages));
        for _ in 0..4 {
            rl.check("peer", LimitClass::InvalidMessages);
        }
        assert!(rl.is_blocked("peer", LimitClass::InvalidMessages));
    }
}
