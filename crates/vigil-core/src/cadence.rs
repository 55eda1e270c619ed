//! Adaptive publish-interval policy.
//!
//! The periodic sampling tick's observed firing cadence is the load proxy:
//! ticks arriving at their nominal period mean the consumer thread is keeping
//! up (publish at the fast interval); ticks stretched toward twice the
//! nominal period mean it is saturated (stretch toward the slow interval).
//! Pure functions so the interpolation is testable without a clock.

use crate::config::SchedulerConfig;
use std::time::Duration;

/// Minimum inter-publish spacing for an observed average tick period.
///
/// Observed at or under nominal → `fast_interval`; at or over twice nominal
/// → `slow_interval`; linear interpolation between, clamped at both ends.
pub fn publish_interval(cfg: &SchedulerConfig, observed_period: Duration) -> Duration {
    let nominal = cfg.nominal_tick.as_secs_f64();
    if nominal <= 0.0 {
        return cfg.fast_interval;
    }
    let observed = observed_period.as_secs_f64();
    // 0.0 at nominal cadence, 1.0 at half-nominal frequency (period doubled).
    let degradation = ((observed - nominal) / nominal).clamp(0.0, 1.0);
    let fast = cfg.fast_interval.as_secs_f64();
    let slow = cfg.slow_interval.as_secs_f64();
    Duration::from_secs_f64(fast + degradation * (slow - fast))
}

/// Average of a trailing window of tick periods.
pub fn average_period(samples: &[Duration]) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total / samples.len() as u32)
}
