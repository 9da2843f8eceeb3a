use super::base::{CallBucket, LatencyHistogram, LeapArray, HISTOGRAM_SLOTS};
use crate::base::{CallEvent, CallStats, CmdKeyStatsSnapshot, LatencyPercentiles};
use crate::{logging, Result};

pub type CallLeapArray = LeapArray<CallBucket>;

/// Per-key outcome statistics over a sliding window.
///
/// The paired executor is the only reporter, so events arrive in the order
/// the underlying calls completed. Reporting failures (a bucket lookup on a
/// torn clock, a saturated counter) never reach the executor; they are
/// logged and dropped.
#[derive(Debug)]
pub struct CallStatsAggregator {
    window: CallLeapArray,
}

impl CallStatsAggregator {
    pub fn new(sample_count: u32, interval_ms: u32) -> Result<Self> {
        Ok(CallStatsAggregator {
            window: CallLeapArray::new(sample_count, interval_ms)?,
        })
    }

    /// Record a completed call: `Succ`, `Err` or `Timeout`, with its
    /// round-trip latency.
    pub fn report_outcome(&self, event: CallEvent, latency_ms: u64) {
        debug_assert!(event != CallEvent::CbOpen);
        match self.window.current_bucket() {
            Ok(bucket) => bucket.value().add_with_latency(event, latency_ms),
            Err(err) => logging::error!(
                "[CallStatsAggregator] dropping outcome event, no bucket: {:?}",
                err
            ),
        }
    }

    /// Record a call rejected by the open breaker. Rejections never ran,
    /// so they carry no latency.
    pub fn report_rejection(&self) {
        match self.window.current_bucket() {
            Ok(bucket) => bucket.value().add(CallEvent::CbOpen),
            Err(err) => logging::error!(
                "[CallStatsAggregator] dropping rejection event, no bucket: {:?}",
                err
            ),
        }
    }

    /// Aggregate every bucket still inside the window into an immutable
    /// snapshot.
    pub fn snapshot(&self, now: u64) -> CmdKeyStatsSnapshot {
        let mut stats = CallStats::default();
        let mut histogram = [0u64; HISTOGRAM_SLOTS];
        for bucket in self.window.get_valid_values(now) {
            let bucket = bucket.value();
            stats.succ = stats.succ.saturating_add(bucket.get(CallEvent::Succ));
            stats.err = stats.err.saturating_add(bucket.get(CallEvent::Err));
            stats.timeout = stats.timeout.saturating_add(bucket.get(CallEvent::Timeout));
            stats.cb_open = stats.cb_open.saturating_add(bucket.get(CallEvent::CbOpen));
            bucket.merge_latency_into(&mut histogram);
        }
        CmdKeyStatsSnapshot {
            call_stats: stats,
            latency: percentiles(&histogram),
            window_start_ms: now.saturating_sub(self.window.interval_ms() as u64),
        }
    }

    /// Forget the whole window, e.g. when the breaker closes again.
    pub fn reset(&self) {
        self.window.reset_all();
    }
}

fn percentiles(histogram: &[u64; HISTOGRAM_SLOTS]) -> LatencyPercentiles {
    let total: u64 = histogram.iter().fold(0u64, |acc, &c| acc.saturating_add(c));
    if total == 0 {
        return LatencyPercentiles::default();
    }
    LatencyPercentiles {
        p50: value_at_rank(histogram, rank_of(total, 50)),
        p95: value_at_rank(histogram, rank_of(total, 95)),
        p99: value_at_rank(histogram, rank_of(total, 99)),
    }
}

fn rank_of(total: u64, quantile: u64) -> u64 {
    let rank = (total as u128 * quantile as u128 + 99) / 100;
    (rank as u64).max(1)
}

fn value_at_rank(histogram: &[u64; HISTOGRAM_SLOTS], rank: u64) -> u64 {
    let mut seen = 0u64;
    for (slot, &count) in histogram.iter().enumerate() {
        seen = seen.saturating_add(count);
        if seen >= rank {
            return LatencyHistogram::lower_bound_ms(slot);
        }
    }
    LatencyHistogram::lower_bound_ms(HISTOGRAM_SLOTS - 1)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::curr_time_millis;
    use std::sync::Arc;
    use std::thread;

    const SAMPLE_COUNT: u32 = 10;
    const INTERVAL_MS: u32 = 1000;

    #[test]
    fn counts_by_event() {
        let agg = CallStatsAggregator::new(SAMPLE_COUNT, INTERVAL_MS).unwrap();
        agg.report_outcome(CallEvent::Succ, 10);
        agg.report_outcome(CallEvent::Succ, 12);
        agg.report_outcome(CallEvent::Err, 7);
        agg.report_outcome(CallEvent::Timeout, 200);
        agg.report_rejection();
        let snapshot = agg.snapshot(curr_time_millis());
        assert_eq!(
            snapshot.call_stats,
            CallStats {
                succ: 2,
                err: 1,
                timeout: 1,
                cb_open: 1,
            }
        );
        assert_eq!(snapshot.call_stats.completed(), 4);
    }

    #[test]
    fn snapshot_window_expires() {
        let agg = CallStatsAggregator::new(SAMPLE_COUNT, INTERVAL_MS).unwrap();
        let now = curr_time_millis();
        agg.report_outcome(CallEvent::Timeout, 200);
        // asking far enough past the window sees nothing
        let snapshot = agg.snapshot(now + 2 * INTERVAL_MS as u64);
        assert_eq!(snapshot.call_stats.timeout, 0);
        assert_eq!(snapshot.window_start_ms, now + INTERVAL_MS as u64);
    }

    #[test]
    fn reset_clears_window() {
        let agg = CallStatsAggregator::new(SAMPLE_COUNT, INTERVAL_MS).unwrap();
        agg.report_outcome(CallEvent::Timeout, 200);
        agg.reset();
        let snapshot = agg.snapshot(curr_time_millis());
        assert_eq!(snapshot.call_stats, CallStats::default());
        assert_eq!(snapshot.latency, LatencyPercentiles::default());
    }

    #[test]
    fn stable_percentiles() {
        let agg = CallStatsAggregator::new(SAMPLE_COUNT, INTERVAL_MS).unwrap();
        // 98 fast calls, 2 slow ones
        for _ in 0..98 {
            agg.report_outcome(CallEvent::Succ, 10);
        }
        agg.report_outcome(CallEvent::Succ, 900);
        agg.report_outcome(CallEvent::Succ, 900);
        let latency = agg.snapshot(curr_time_millis()).latency;
        assert_eq!(latency.p50, LatencyHistogram::lower_bound_ms(4)); // 10ms slot
        assert_eq!(latency.p95, LatencyHistogram::lower_bound_ms(4));
        assert_eq!(latency.p99, LatencyHistogram::lower_bound_ms(10)); // 900ms slot
    }

    #[test]
    fn empty_percentiles_are_zero() {
        let agg = CallStatsAggregator::new(SAMPLE_COUNT, INTERVAL_MS).unwrap();
        assert_eq!(
            agg.snapshot(curr_time_millis()).latency,
            LatencyPercentiles::default()
        );
    }

    #[test]
    fn concurrent_reporting() {
        let agg = Arc::new(CallStatsAggregator::new(SAMPLE_COUNT, INTERVAL_MS).unwrap());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let agg = agg.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    agg.report_outcome(CallEvent::Succ, 5);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snapshot = agg.snapshot(curr_time_millis());
        assert_eq!(snapshot.call_stats.succ, 1000);
    }
}
