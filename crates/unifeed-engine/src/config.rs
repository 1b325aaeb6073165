//! Engine configuration.
//!
//! One process-wide configuration covers the scheduler cadence, the fetch
//! window, per-attempt limits and the failure backoff policy. Bounds are
//! clamped on construction so a bad value degrades instead of misbehaving.

use std::time::Duration;

use chrono::{DateTime, Utc};
use unifeed_core::TimeWindow;

/// Smallest allowed sync interval (1 minute).
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(60);
/// Largest allowed sync interval (1440 minutes).
pub const MAX_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential backoff for failing sources.
///
/// The delay doubles per consecutive failure starting from `base`, and
/// stops growing after `max_steps` failures. Any success resets the
/// failure counter, which resets the delay to `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Number of doublings before the delay plateaus.
    pub max_steps: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max_steps: 6,
        }
    }
}

impl BackoffPolicy {
    /// The wait before the next attempt after `consecutive_failures`
    /// failures. Zero failures means no wait.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let step = consecutive_failures.min(self.max_steps);
        self.base * 2u32.pow(step - 1)
    }

    /// The plateau delay.
    pub fn ceiling(&self) -> Duration {
        self.delay(self.max_steps)
    }
}

/// Process-wide engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between scheduled syncs of a healthy source.
    pub sync_interval: Duration,
    /// How often the scheduler scans for due sources.
    pub scheduler_tick: Duration,
    /// Fetch window: how far into the past events are pulled.
    pub lookbehind: chrono::Duration,
    /// Fetch window: how far into the future events are pulled.
    pub lookahead: chrono::Duration,
    /// Hard ceiling on one sync attempt, credentials and fetch included.
    /// Overruns count as transient network failures.
    pub attempt_timeout: Duration,
    /// Worker pool size: sync attempts running concurrently across sources.
    pub max_concurrent_syncs: usize,
    /// Backoff policy for failing sources.
    pub backoff: BackoffPolicy,
    /// How many sync runs to keep in the observability history.
    pub run_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(10 * 60),
            scheduler_tick: Duration::from_secs(30),
            lookbehind: chrono::Duration::days(30),
            lookahead: chrono::Duration::days(365),
            attempt_timeout: Duration::from_secs(120),
            max_concurrent_syncs: 4,
            backoff: BackoffPolicy::default(),
            run_history: 256,
        }
    }
}

impl EngineConfig {
    /// Builder: set the sync interval, clamped to the 1–1440 minute bounds.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.clamp(MIN_SYNC_INTERVAL, MAX_SYNC_INTERVAL);
        self
    }

    /// Builder: set the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Builder: set the worker pool size (at least 1).
    #[must_use]
    pub fn with_max_concurrent_syncs(mut self, workers: usize) -> Self {
        self.max_concurrent_syncs = workers.max(1);
        self
    }

    /// Builder: set the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builder: set the scheduler scan tick.
    #[must_use]
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// The fetch window for a sync attempt starting at `now`.
    pub fn fetch_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::around(now, self.lookbehind, self.lookahead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sync_interval_is_clamped() {
        let config = EngineConfig::default().with_sync_interval(Duration::from_secs(1));
        assert_eq!(config.sync_interval, MIN_SYNC_INTERVAL);

        let config = EngineConfig::default().with_sync_interval(Duration::from_secs(999_999_999));
        assert_eq!(config.sync_interval, MAX_SYNC_INTERVAL);

        let config = EngineConfig::default().with_sync_interval(Duration::from_secs(300));
        assert_eq!(config.sync_interval, Duration::from_secs(300));
    }

    #[test]
    fn backoff_grows_strictly_then_plateaus() {
        let backoff = BackoffPolicy::default();

        assert_eq!(backoff.delay(0), Duration::ZERO);

        // Strictly increasing through the doubling steps.
        let delays: Vec<_> = (1..=6).map(|n| backoff.delay(n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0], "expected strict growth: {delays:?}");
        }

        assert_eq!(backoff.delay(1), Duration::from_secs(60));
        assert_eq!(backoff.delay(2), Duration::from_secs(120));
        assert_eq!(backoff.delay(3), Duration::from_secs(240));

        // Plateau after max_steps.
        assert_eq!(backoff.delay(6), backoff.ceiling());
        assert_eq!(backoff.delay(7), backoff.ceiling());
        assert_eq!(backoff.delay(100), backoff.ceiling());
        assert_eq!(backoff.ceiling(), Duration::from_secs(60 * 32));
    }

    #[test]
    fn fetch_window_spans_lookbehind_to_lookahead() {
        let config = EngineConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 2, 5, 12, 0, 0).unwrap();
        let window = config.fetch_window(now);
        assert_eq!(window.start, now - chrono::Duration::days(30));
        assert_eq!(window.end, now + chrono::Duration::days(365));
    }

    #[test]
    fn worker_pool_has_at_least_one_worker() {
        let config = EngineConfig::default().with_max_concurrent_syncs(0);
        assert_eq!(config.max_concurrent_syncs, 1);
    }
}
