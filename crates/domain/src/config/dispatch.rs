use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch (poll + push triggers feeding the worker pool)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which pending rows the poll trigger considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BacklogPolicy {
    /// Pick up every pending row, including ones created before startup.
    #[default]
    Recover,
    /// Only rows created after process start.
    IgnoreStale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Poll cadence. `0` disables the periodic poll (the startup sweep
    /// still runs when `startup_sweep` is set).
    #[serde(default = "d_10u")]
    pub poll_interval_secs: u64,
    #[serde(default = "d_true")]
    pub startup_sweep: bool,
    #[serde(default)]
    pub backlog: BacklogPolicy,
    /// Subscribe to the store's change feed.
    #[serde(default = "d_true")]
    pub push: bool,
    /// Concurrent stage invocations.
    #[serde(default = "d_10")]
    pub workers: usize,
    /// Jobs buffered between the triggers and the worker pool. Submissions
    /// beyond this are dropped and picked up again by the next poll.
    #[serde(default = "d_256")]
    pub queue_capacity: usize,
    /// Max rows fetched per poll query.
    #[serde(default = "d_100")]
    pub poll_batch: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: d_10u(),
            startup_sweep: true,
            backlog: BacklogPolicy::Recover,
            push: true,
            workers: d_10(),
            queue_capacity: d_256(),
            poll_batch: d_100(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Idle reaper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_3600")]
    pub interval_secs: u64,
    /// Conversations quiet for longer than this are closed.
    #[serde(default = "d_3600")]
    pub idle_threshold_secs: u64,
    #[serde(default = "d_true")]
    pub run_on_start: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: d_3600(),
            idle_threshold_secs: d_3600(),
            run_on_start: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_10() -> usize {
    10
}
fn d_10u() -> u64 {
    10
}
fn d_100() -> usize {
    100
}
fn d_256() -> usize {
    256
}
fn d_3600() -> u64 {
    3_600
}
