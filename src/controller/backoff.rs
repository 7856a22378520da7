//! # Backoff
//!
//! Exponential backoff shared by the reconcilers and the dispatcher.
//!
//! Each object keeps its own attempt count so a burst of failures on one
//! object never slows down another.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff with a cap
///
/// The sequence doubles from `base` until it reaches `max`:
/// 5s, 10s, 20s, 40s, 80s, 160s, 300s, 300s ... for the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff policy; `max` is raised to `base` if lower
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Upper bound of the sequence
    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Per-object attempt counters feeding an [`ExponentialBackoff`]
///
/// Counters live in memory only; a restart starts every object from zero.
#[derive(Debug)]
pub struct BackoffTracker<K> {
    policy: ExponentialBackoff,
    attempts: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> BackoffTracker<K> {
    /// Create an empty tracker
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self {
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure; returns the attempt number and the delay to wait
    pub fn record_failure(&self, key: &K) -> (u32, Duration) {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = attempts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        (*count, self.policy.delay(*count))
    }

    /// Current attempt count
    pub fn attempts(&self, key: &K) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Forget an object's failures
    pub fn reset(&self, key: &K) {
        self.attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    /// Policy in use
    pub fn policy(&self) -> ExponentialBackoff {
        self.policy
    }
}

/// Earliest instant each object may be retried
///
/// A reconciliation triggered before its retry is due (a watch event caused
/// by our own status write, for instance) waits out the remainder instead of
/// calling the CA again.
#[derive(Debug)]
pub struct RetryGate<K> {
    not_before: Mutex<HashMap<K, Instant>>,
}

impl<K: Eq + Hash + Clone> Default for RetryGate<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> RetryGate<K> {
    pub fn new() -> Self {
        Self {
            not_before: Mutex::new(HashMap::new()),
        }
    }

    /// Hold an object back for `delay`
    pub fn defer(&self, key: &K, delay: Duration) {
        self.not_before
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.clone(), Instant::now() + delay);
    }

    /// Time left before the object may be retried; `None` once it is due
    pub fn remaining(&self, key: &K) -> Option<Duration> {
        let mut not_before = self
            .not_before
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let deadline = *not_before.get(key)?;
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            not_before.remove(key);
            None
        } else {
            Some(left)
        }
    }

    pub fn clear(&self, key: &K) {
        self.not_before
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }
}
