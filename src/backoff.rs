//! Bounded exponential backoff.
//!
//! A [`BackoffPolicy`] is a pure description of a delay schedule and its
//! budget. A [`BackoffState`] tracks one sequence of failures against it and
//! is never shared between sequences.
//!
//! Two policies are in play:
//!
//! | Policy | Budget | Governs |
//! |--------|--------|---------|
//! | [`BackoffPolicy::connection`] | 300s elapsed | Transport open retries |
//! | [`BackoffPolicy::request`] | 3 attempts | One request's transient failures |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use esologs_client::backoff::{BackoffPolicy, Budget};
//!
//! let policy = BackoffPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(1))
//!     .with_budget(Budget::Attempts(3));
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;

// ============================================================================
// Constants
// ============================================================================

/// Default total time spent establishing a connection.
pub const DEFAULT_CONNECT_BUDGET: Duration = Duration::from_secs(300);

/// Default attempts per request, including the first.
pub const DEFAULT_REQUEST_ATTEMPTS: u32 = 3;

/// Exponent beyond which every realistic schedule is already at its cap.
const MAX_EXPONENT: u32 = 63;

// ============================================================================
// Budget
// ============================================================================

/// When a failure sequence stops retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Stop once this much time has passed since the first attempt.
    Elapsed(Duration),
    /// Stop after this many attempts in total.
    Attempts(u32),
    /// Never stop.
    Unbounded,
}

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Exponential delay schedule with a cap and a budget.
///
/// `delay_for_attempt(n) = min(base * multiplier^n, max_delay)`, which is
/// non-decreasing in `n` because the multiplier is clamped to at least 1.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
    budget: Budget,
}

impl BackoffPolicy {
    /// Creates an unbounded policy.
    ///
    /// A multiplier below 1 (or NaN) is treated as 1.
    #[must_use]
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        let multiplier = if multiplier.is_nan() {
            1.0
        } else {
            multiplier.max(1.0)
        };

        Self {
            base: base.min(max_delay),
            multiplier,
            max_delay,
            budget: Budget::Unbounded,
        }
    }

    /// Policy for establishing the connection: 1s doubling up to 60s,
    /// 300s budget.
    #[must_use]
    pub fn connection() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(60))
            .with_budget(Budget::Elapsed(DEFAULT_CONNECT_BUDGET))
    }

    /// Policy for a single request: 1s doubling up to 10s, 3 attempts.
    #[must_use]
    pub fn request() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(10))
            .with_budget(Budget::Attempts(DEFAULT_REQUEST_ATTEMPTS))
    }

    /// Replaces the budget.
    #[inline]
    #[must_use]
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Returns the first delay.
    #[inline]
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay cap.
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the budget.
    #[inline]
    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    /// Delay to wait after the failure of attempt `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(MAX_EXPONENT) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(secs).min(self.max_delay)
    }

    /// Starts a new failure sequence.
    #[inline]
    #[must_use]
    pub fn start(&self) -> BackoffState {
        BackoffState::new(self.clone())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::connection()
    }
}

// ============================================================================
// BackoffState
// ============================================================================

/// Progress of one failure sequence.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    failures: u32,
    started: Instant,
    next_delay: Duration,
}

impl BackoffState {
    fn new(policy: BackoffPolicy) -> Self {
        let next_delay = policy.delay_for_attempt(0);
        Self {
            policy,
            failures: 0,
            started: Instant::now(),
            next_delay,
        }
    }

    /// Failures recorded so far.
    #[inline]
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Time since the sequence started.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left in an elapsed-time budget, `None` for other budgets.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        match self.policy.budget {
            Budget::Elapsed(limit) => Some(limit.saturating_sub(self.elapsed())),
            Budget::Attempts(_) | Budget::Unbounded => None,
        }
    }

    /// Delay that the next recorded failure will yield.
    #[inline]
    #[must_use]
    pub fn peek_delay(&self) -> Duration {
        self.next_delay
    }

    /// Returns `true` once the budget is spent.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        match self.policy.budget {
            Budget::Elapsed(limit) => self.elapsed() >= limit,
            Budget::Attempts(max) => self.failures >= max,
            Budget::Unbounded => false,
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    ///
    /// Returns `None` when the budget is spent. The failure still counts, so
    /// callers that keep going past the budget get the capped delay from
    /// [`peek_delay`](Self::peek_delay).
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.next_delay;
        self.failures = self.failures.saturating_add(1);
        self.next_delay = self.policy.delay_for_attempt(self.failures);

        if self.is_exhausted() {
            None
        } else {
            Some(delay)
        }
    }

    /// Starts over: no failures, fresh clock.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.started = Instant::now();
        self.next_delay = self.policy.delay_for_attempt(0);
    }
}

// ============================================================================
// Tests
// ============================================================================
