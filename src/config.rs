//! Configuration parameters and their documented defaults/bounds.
//!
//! Values supplied by the host are clamped rather than silently truncated:
//! clamping is logged at `warn!` so a misconfigured host notices in its logs
//! instead of getting a queue that behaves unexpectedly.

use std::time::Duration;

use crate::argument::ReuseStrategy;
use crate::error::{Result, TaskError};

/// Highest `maxPriority` a [`crate::manager::PriorityTaskManager`] will
/// accept.
pub const MAX_PRIORITY_CEILING: u32 = 100;
const MIN_PRIORITY_CEILING: u32 = 1;

const MIN_SCHEDULER_HORIZON: Duration = Duration::from_secs(1);
const MAX_SCHEDULER_HORIZON: Duration = Duration::from_secs(60 * 60);

/// Per-queue/per-scheduler configuration.
///
/// Every bound is enforced at construction time via [`Config::clamped`],
/// never at use time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Global per-queue ceiling on retries. Attempt counts requested above
    /// this are clamped down.
    pub max_attempts: u32,
    /// Highest priority level a [`crate::manager::PriorityTaskManager`]
    /// will accept, clamped to `[1, 100]`.
    pub max_priority: u32,
    /// Processor fan-out: how many tasks a single worker may execute
    /// concurrently.
    pub max_concurrency: u32,
    /// Which [`ReuseStrategy`] the processor uses to acquire its argument.
    pub reuse_strategy: ReuseStrategy,
    /// Scheduler dispatcher look-ahead, clamped to `[1s, 1h]`.
    pub scheduler_horizon: Duration,
    /// Scheduler arm-early slack, kept configurable for tests that need to
    /// shrink it.
    pub scheduler_beforehand: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: u32::MAX,
            max_priority: MAX_PRIORITY_CEILING,
            max_concurrency: 1,
            reuse_strategy: ReuseStrategy::SingleReusable,
            scheduler_horizon: Duration::from_secs(10),
            scheduler_beforehand: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Return a copy of `self` with every field clamped to its documented
    /// bound, logging a `warn!` for each field that had to move.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        if self.max_attempts < 1 {
            tracing::warn!(requested = self.max_attempts, "max_attempts below 1, clamping to 1");
            self.max_attempts = 1;
        }
        let clamped_priority = self
            .max_priority
            .clamp(MIN_PRIORITY_CEILING, MAX_PRIORITY_CEILING);
        if clamped_priority != self.max_priority {
            tracing::warn!(
                requested = self.max_priority,
                clamped = clamped_priority,
                "max_priority out of [1,100], clamping"
            );
            self.max_priority = clamped_priority;
        }
        if self.max_concurrency < 1 {
            tracing::warn!(
                requested = self.max_concurrency,
                "max_concurrency below 1, clamping to 1"
            );
            self.max_concurrency = 1;
        }
        let clamped_horizon = self
            .scheduler_horizon
            .clamp(MIN_SCHEDULER_HORIZON, MAX_SCHEDULER_HORIZON);
        if clamped_horizon != self.scheduler_horizon {
            tracing::warn!(
                requested_secs = self.scheduler_horizon.as_secs(),
                clamped_secs = clamped_horizon.as_secs(),
                "scheduler_horizon out of [1s,1h], clamping"
            );
            self.scheduler_horizon = clamped_horizon;
        }
        self
    }

    /// Validate and clamp a per-call `attempts` request to `max_attempts`.
    ///
    /// `attempts < 1` is a construction-time error (raised synchronously to
    /// the submitter), not a value to silently bump up to 1.
    pub fn clamp_attempts(&self, attempts: u32) -> Result<u32> {
        if attempts < 1 {
            return Err(TaskError::OutOfRange(format!(
                "attempts must be >= 1, got {attempts}"
            )));
        }
        Ok(attempts.min(self.max_attempts))
    }

    /// Clamp a per-call `priority` request to `[0, max_priority]`.
    #[must_use]
    pub fn clamp_priority(&self, priority: u32) -> u32 {
        priority.min(self.max_priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_table() {
        let cfg = Config::default();
        assert_eq!(cfg.max_attempts, u32::MAX);
        assert_eq!(cfg.max_priority, 100);
        assert_eq!(cfg.max_concurrency, 1);
        assert_eq!(cfg.scheduler_horizon, Duration::from_secs(10));
        assert_eq!(cfg.scheduler_beforehand, Duration::from_secs(5));
    }

    #[test]
    fn clamping_enforces_bounds() {
        let cfg = Config {
            max_attempts: 0,
            max_priority: 500,
            max_concurrency: 0,
            scheduler_horizon: Duration::from_secs(1000 * 60 * 60),
            ..Config::default()
        }
        .clamped();
        assert_eq!(cfg.max_attempts, 1);
        assert_eq!(cfg.max_priority, 100);
        assert_eq!(cfg.max_concurrency, 1);
        assert_eq!(cfg.scheduler_horizon, MAX_SCHEDULER_HORIZON);
    }

    #[test]
    fn clamp_helpers_respect_config() {
        let cfg = Config {
            max_attempts: 5,
            max_priority: 10,
            ..Config::default()
        };
        assert_eq!(cfg.clamp_attempts(99).unwrap(), 5);
        assert!(matches!(
            cfg.clamp_attempts(0),
            Err(TaskError::OutOfRange(_))
        ));
        assert_eq!(cfg.clamp_priority(99), 10);
    }
}
