use enum_map::Enum;

/// The countable outcomes of one call attempt.
///
/// succ + err + timeout == completed calls; cb_open counts rejections that
/// never ran and therefore carries no latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum CallEvent {
    /// call completed with a value
    Succ,
    /// call completed with a user error
    Err,
    /// call lost the race against its deadline
    Timeout,
    /// call rejected because the breaker was open
    CbOpen,
}

/// Running counters over the active sampling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub succ: u64,
    pub err: u64,
    pub timeout: u64,
    pub cb_open: u64,
}

impl CallStats {
    pub fn completed(&self) -> u64 {
        self.succ
            .saturating_add(self.err)
            .saturating_add(self.timeout)
    }
}

/// Millisecond latency percentiles over the window, derived from the
/// bucketed histogram at its fixed resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

/// Immutable summary of the recent call outcomes for one command key,
/// emitted on every stats tick. Snapshots drive breaker decisions and are
/// replaced wholesale on the next tick.
#[derive(Debug, Clone)]
pub struct CmdKeyStatsSnapshot {
    pub call_stats: CallStats,
    pub latency: LatencyPercentiles,
    pub window_start_ms: u64,
}
