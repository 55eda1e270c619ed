//! Configuration for the storage adapter, publish scheduler, and checkpointer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the SQLite storage adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum number of distinct identifiers a single commit may touch
    /// before incremental tracking is abandoned in favor of a full reset.
    #[serde(default = "default_ceiling")]
    pub change_set_ceiling: usize,

    /// SQLite busy timeout for the write connection, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// SQLite cache size (in pages, negative = KB).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,
}

fn default_ceiling() -> usize {
    200
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_cache_size() -> i32 {
    -64000 // 64MB
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            change_set_ceiling: default_ceiling(),
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size: default_cache_size(),
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the change-set ceiling.
    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.change_set_ceiling = ceiling;
        self
    }

    /// Set the write-connection busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Configuration for the adaptive publish scheduler.
///
/// The scheduler samples the actual firing cadence of its periodic tick and
/// uses it as a load proxy: a tick arriving on time means the consumer thread
/// is keeping up, so publishes may be spaced at `fast_interval`; a tick
/// delayed toward twice its nominal period means the thread is saturated, so
/// spacing stretches toward `slow_interval`. The thresholds are tunable
/// policy, not a correctness requirement.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Nominal period of the sampling tick.
    pub nominal_tick: Duration,
    /// Minimum inter-publish spacing when the tick fires at nominal cadence.
    pub fast_interval: Duration,
    /// Minimum inter-publish spacing when the tick has degraded to half its
    /// nominal frequency (or worse), or while the app is backgrounded.
    pub slow_interval: Duration,
    /// Number of recent tick periods in the trailing sample window.
    pub sample_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            nominal_tick: Duration::from_millis(20),
            fast_interval: Duration::from_millis(20),
            slow_interval: Duration::from_millis(100),
            sample_window: 8,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fast_interval(mut self, interval: Duration) -> Self {
        self.fast_interval = interval;
        self
    }

    pub fn with_slow_interval(mut self, interval: Duration) -> Self {
        self.slow_interval = interval;
        self
    }

    pub fn with_nominal_tick(mut self, tick: Duration) -> Self {
        self.nominal_tick = tick;
        self
    }
}

/// Policy for the opportunistic WAL checkpointer.
///
/// Escalation is deterministic ("every Nth attempt") rather than randomized
/// so it can be asserted on in tests.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    /// Minimum spacing between checkpoint attempts; nudges arriving sooner
    /// are dropped.
    pub min_interval: Duration,
    /// Every Nth attempt escalates from a passive checkpoint to a blocking
    /// truncating one. Zero disables escalation entirely.
    pub blocking_every: u32,
    /// Busy timeout for the blocking mode; on expiry the checkpoint gives up
    /// silently and retries on a later nudge.
    pub busy_timeout: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(250),
            blocking_every: 10,
            busy_timeout: Duration::from_millis(50),
        }
    }
}

impl CheckpointPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_blocking_every(mut self, every: u32) -> Self {
        self.blocking_every = every;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Publish scheduler tuning.
    pub scheduler: SchedulerConfig,
    /// Checkpoint policy.
    pub checkpoint: CheckpointPolicy,
    /// Debounce window for cross-process write signals; all signals arriving
    /// within one window collapse into a single external-update notification.
    pub external_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            checkpoint: CheckpointPolicy::default(),
            external_debounce: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_checkpoint(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint = policy;
        self
    }

    pub fn with_external_debounce(mut self, window: Duration) -> Self {
        self.external_debounce = window;
        self
    }
}
