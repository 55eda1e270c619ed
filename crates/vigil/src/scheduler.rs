//! Publish cadence state for the consumer loop.
//!
//! The scheduler tracks a trailing window of tick periods and decides,
//! from the observed load and the foreground flag, how far apart
//! publishes may land. It owns no timers itself; the consumer loop asks
//! [`PublishScheduler::until_next_tick`] for the next sleep and reports
//! ticks and publishes back.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use vigil_core::cadence::{average_period, publish_interval};
use vigil_core::SchedulerConfig;

pub(crate) struct PublishScheduler {
    cfg: SchedulerConfig,
    /// Trailing tick-to-tick periods, newest last.
    samples: VecDeque<Duration>,
    last_tick: Option<Instant>,
    last_publish: Option<Instant>,
    foregrounded: bool,
}

impl PublishScheduler {
    pub(crate) fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            samples: VecDeque::new(),
            last_tick: None,
            last_publish: None,
            foregrounded: true,
        }
    }

    /// Starts the tick clock without recording a sample. Called when the
    /// buffer goes from empty to non-empty so the first period is not
    /// measured from some stale instant.
    pub(crate) fn arm(&mut self, now: Instant) {
        if self.last_tick.is_none() {
            self.last_tick = Some(now);
        }
    }

    /// Stops the tick clock. Accumulated samples are kept; idle gaps are
    /// never counted as periods because the clock restarts via [`arm`].
    pub(crate) fn disarm(&mut self) {
        self.last_tick = None;
    }

    /// Records a timer tick and the period since the previous one.
    pub(crate) fn on_tick(&mut self, now: Instant) {
        if let Some(prev) = self.last_tick {
            self.samples.push_back(now.saturating_duration_since(prev));
            while self.samples.len() > self.cfg.sample_window {
                self.samples.pop_front();
            }
        }
        self.last_tick = Some(now);
    }

    /// Delay until the next tick should fire.
    pub(crate) fn until_next_tick(&self, now: Instant) -> Duration {
        match self.last_tick {
            Some(prev) => (prev + self.cfg.nominal_tick).saturating_duration_since(now),
            None => self.cfg.nominal_tick,
        }
    }

    /// Minimum spacing between publishes under current conditions.
    pub(crate) fn current_interval(&self) -> Duration {
        if !self.foregrounded {
            return self.cfg.slow_interval;
        }
        let samples: Vec<Duration> = self.samples.iter().copied().collect();
        match average_period(&samples) {
            Some(observed) => publish_interval(&self.cfg, observed),
            None => self.cfg.fast_interval,
        }
    }

    pub(crate) fn may_publish(&self, now: Instant) -> bool {
        match self.last_publish {
            Some(prev) => now.saturating_duration_since(prev) >= self.current_interval(),
            None => true,
        }
    }

    pub(crate) fn note_publish(&mut self, now: Instant) {
        self.last_publish = Some(now);
    }

    pub(crate) fn set_foregrounded(&mut self, foregrounded: bool) {
        self.foregrounded = foregrounded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> PublishScheduler {
        PublishScheduler::new(SchedulerConfig::new())
    }

    #[test]
    fn first_publish_is_immediate() {
        let sched = scheduler();
        assert!(sched.may_publish(Instant::now()));
    }

    #[test]
    fn publishes_are_spaced_by_the_current_interval() {
        let mut sched = scheduler();
        let now = Instant::now();
        sched.note_publish(now);
        assert!(!sched.may_publish(now + Duration::from_millis(5)));
        assert!(sched.may_publish(now + Duration::from_millis(25)));
    }

    #[test]
    fn nominal_ticks_keep_the_fast_interval() {
        let mut sched = scheduler();
        let mut now = Instant::now();
        sched.arm(now);
        for _ in 0..8 {
            now += Duration::from_millis(20);
            sched.on_tick(now);
        }
        assert_eq!(sched.current_interval(), Duration::from_millis(20));
    }

    #[test]
    fn degraded_ticks_stretch_the_interval() {
        let mut sched = scheduler();
        let mut now = Instant::now();
        sched.arm(now);
        for _ in 0..8 {
            now += Duration::from_millis(40);
            sched.on_tick(now);
        }
        assert_eq!(sched.current_interval(), Duration::from_millis(100));
    }

    #[test]
    fn backgrounded_engine_uses_the_slow_interval() {
        let mut sched = scheduler();
        sched.set_foregrounded(false);
        assert_eq!(sched.current_interval(), Duration::from_millis(100));
        sched.set_foregrounded(true);
        assert_eq!(sched.current_interval(), Duration::from_millis(20));
    }

    #[test]
    fn disarm_discards_the_idle_gap() {
        let mut sched = scheduler();
        let now = Instant::now();
        sched.arm(now);
        sched.on_tick(now + Duration::from_millis(20));
        sched.disarm();
        // A long idle gap, then a new burst. The gap is not a sample.
        let later = now + Duration::from_secs(10);
        sched.arm(later);
        sched.on_tick(later + Duration::from_millis(20));
        assert_eq!(sched.current_interval(), Duration::from_millis(20));
    }

    #[test]
    fn next_tick_is_one_nominal_period_after_the_last() {
        let mut sched = scheduler();
        let now = Instant::now();
        sched.arm(now);
        assert_eq!(
            sched.until_next_tick(now + Duration::from_millis(5)),
            Duration::from_millis(15)
        );
        // Overdue ticks fire immediately.
        assert_eq!(
            sched.until_next_tick(now + Duration::from_millis(50)),
            Duration::ZERO
        );
    }
}
