//! Sliding-window rate limiter.
//!
//! Each `(scope, key)` pair owns a log of admission timestamps. On every check
//! the log is pruned to the trailing window, so no window-sized interval ever
//! admits more than the scope's `max_requests`, including across boundaries.

use deck_core::now_ms;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Scope applied to inbound gateway messages.
pub const WEBSOCKET_SCOPE: &str = "websocket";

/// Admission policy for one scope. `max_requests == 0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePolicy {
    pub max_requests: u32,
    pub window_secs: f64,
}

impl RatePolicy {
    pub const UNLIMITED: RatePolicy = RatePolicy {
        max_requests: 0,
        window_secs: 0.0,
    };

    fn window_ms(&self) -> u64 {
        (self.window_secs.max(0.0) * 1000.0).round() as u64
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the oldest event leaves the window. Zero when allowed.
    pub retry_after_secs: f64,
}

impl RateDecision {
    const ALLOW: RateDecision = RateDecision {
        allowed: true,
        retry_after_secs: 0.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub policies: BTreeMap<String, RatePolicy>,
    pub bucket_count: usize,
}

/// A rate limiter with per-scope policies and per-key event logs.
#[derive(Debug, Default)]
pub struct RateLimiter {
    policies: HashMap<String, RatePolicy>,
    /// (scope, key) → admission timestamps in ms, oldest first.
    buckets: HashMap<(String, String), VecDeque<u64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the policy for `scope`.
    pub fn configure(&mut self, scope: &str, max_requests: u32, window_secs: f64) {
        self.policies.insert(
            scope.to_string(),
            RatePolicy {
                max_requests,
                window_secs,
            },
        );
    }

    /// Policy for `scope`; unconfigured scopes are unlimited.
    pub fn policy(&self, scope: &str) -> RatePolicy {
        self.policies
            .get(scope)
            .copied()
            .unwrap_or(RatePolicy::UNLIMITED)
    }

    /// Check if an event for `key` is admitted under `scope`, and record it if so.
    pub fn check(&mut self, scope: &str, key: &str) -> RateDecision {
        self.check_at(scope, key, now_ms())
    }

    pub fn check_at(&mut self, scope: &str, key: &str, now_ms: u64) -> RateDecision {
        let policy = self.policy(scope);
        if policy.max_requests == 0 {
            return RateDecision::ALLOW;
        }

        let window = policy.window_ms();
        let window_start = now_ms.saturating_sub(window);
        let bucket = self
            .buckets
            .entry((scope.to_string(), key.to_string()))
            .or_default();

        while bucket.front().is_some_and(|ts| *ts < window_start) {
            bucket.pop_front();
        }

        if bucket.len() >= policy.max_requests as usize {
            let oldest = bucket.front().copied().unwrap_or(now_ms);
            let retry_ms = (oldest + window).saturating_sub(now_ms);
            return RateDecision {
                allowed: false,
                retry_after_secs: retry_ms as f64 / 1000.0,
            };
        }

        bucket.push_back(now_ms);
        RateDecision::ALLOW
    }

    /// Garbage-collect buckets with no events left in their window.
    ///
    /// Returns the number of buckets removed.
    pub fn gc(&mut self) -> usize {
        self.gc_at(now_ms())
    }

    pub fn gc_at(&mut self, now_ms: u64) -> usize {
        let policies = &self.policies;
        let before = self.buckets.len();
        self.buckets.retain(|(scope, _), events| {
            let window = policies
                .get(scope)
                .copied()
                .unwrap_or(RatePolicy::UNLIMITED)
                .window_ms();
            let window_start = now_ms.saturating_sub(window);
            events.retain(|ts| *ts >= window_start);
            !events.is_empty()
        });
        before - self.buckets.len()
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            policies: self
                .policies
                .iter()
                .map(|(scope, policy)| (scope.clone(), *policy))
                .collect(),
            bucket_count: self.buckets.len(),
        }
    }
}
