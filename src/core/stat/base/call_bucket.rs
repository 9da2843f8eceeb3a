use crate::base::CallEvent;
use enum_map::EnumMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counted latencies are binned by power-of-two millisecond bounds; the
/// last slot absorbs everything beyond it.
pub const HISTOGRAM_SLOTS: usize = 28;

/// All operations on a metric are required to be thread-safe; the metric
/// carries internal mutability so buckets can be shared without an outer
/// lock.
pub trait MetricTrait: fmt::Debug + Default + Send + Sync {
    fn reset(&self);
}

/// Latency histogram with fixed power-of-two resolution. Slot 0 holds
/// sub-millisecond calls; slot i (i ≥ 1) holds [2^(i-1), 2^i) ms.
pub struct LatencyHistogram {
    slots: [AtomicU64; HISTOGRAM_SLOTS],
}

impl fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyHistogram").finish_non_exhaustive()
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        LatencyHistogram {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl LatencyHistogram {
    pub(crate) fn slot_of(latency_ms: u64) -> usize {
        if latency_ms == 0 {
            return 0;
        }
        let slot = 64 - latency_ms.leading_zeros() as usize;
        slot.min(HISTOGRAM_SLOTS - 1)
    }

    /// Lower bound of a slot in milliseconds, the value percentile queries
    /// resolve to.
    pub(crate) fn lower_bound_ms(slot: usize) -> u64 {
        if slot == 0 {
            0
        } else {
            1u64 << (slot - 1)
        }
    }

    pub fn record(&self, latency_ms: u64) {
        let slot = Self::slot_of(latency_ms);
        // saturate instead of wrapping under extreme load
        let _ = self.slots[slot].fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            v.checked_add(1)
        });
    }

    pub fn merge_into(&self, into: &mut [u64; HISTOGRAM_SLOTS]) {
        for (slot, count) in self.slots.iter().enumerate() {
            into[slot] = into[slot].saturating_add(count.load(Ordering::SeqCst));
        }
    }

    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::SeqCst);
        }
    }
}

/// CallBucket records the call outcomes of one minimum time unit (the
/// bucket time span) together with their latency distribution.
#[derive(Debug, Default)]
pub struct CallBucket {
    counter: EnumMap<CallEvent, AtomicU64>,
    latency: LatencyHistogram,
}

impl MetricTrait for CallBucket {
    fn reset(&self) {
        for (_, item) in &self.counter {
            item.store(0, Ordering::SeqCst);
        }
        self.latency.reset();
    }
}

impl CallBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an event. Counters saturate at the maximum rather than wrap.
    pub fn add(&self, event: CallEvent) {
        let _ = self.counter[event].fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            v.checked_add(1)
        });
    }

    /// Count a completed call together with its round-trip latency.
    pub fn add_with_latency(&self, event: CallEvent, latency_ms: u64) {
        self.add(event);
        self.latency.record(latency_ms);
    }

    pub fn get(&self, event: CallEvent) -> u64 {
        self.counter[event].load(Ordering::SeqCst)
    }

    pub fn merge_latency_into(&self, into: &mut [u64; HISTOGRAM_SLOTS]) {
        self.latency.merge_into(into);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread::spawn;

    #[test]
    fn slots() {
        assert_eq!(LatencyHistogram::slot_of(0), 0);
        assert_eq!(LatencyHistogram::slot_of(1), 1);
        assert_eq!(LatencyHistogram::slot_of(2), 2);
        assert_eq!(LatencyHistogram::slot_of(3), 2);
        assert_eq!(LatencyHistogram::slot_of(200), 8);
        assert_eq!(LatencyHistogram::slot_of(u64::MAX), HISTOGRAM_SLOTS - 1);
        assert_eq!(LatencyHistogram::lower_bound_ms(0), 0);
        assert_eq!(LatencyHistogram::lower_bound_ms(8), 128);
    }

    #[test]
    fn single() {
        let bucket = CallBucket::new();
        for i in 0..120 {
            match i % 4 {
                0 => bucket.add_with_latency(CallEvent::Succ, 10),
                1 => bucket.add_with_latency(CallEvent::Err, 10),
                2 => bucket.add_with_latency(CallEvent::Timeout, 200),
                3 => bucket.add(CallEvent::CbOpen),
                _ => {}
            }
        }
        assert_eq!(bucket.get(CallEvent::Succ), 30);
        assert_eq!(bucket.get(CallEvent::Err), 30);
        assert_eq!(bucket.get(CallEvent::Timeout), 30);
        assert_eq!(bucket.get(CallEvent::CbOpen), 30);
        let mut hist = [0u64; HISTOGRAM_SLOTS];
        bucket.merge_latency_into(&mut hist);
        assert_eq!(hist[LatencyHistogram::slot_of(10)], 60);
        assert_eq!(hist[LatencyHistogram::slot_of(200)], 30);
    }

    #[test]
    fn saturates_at_max() {
        let bucket = CallBucket::new();
        bucket.counter[CallEvent::Succ].store(u64::MAX, Ordering::SeqCst);
        bucket.add(CallEvent::Succ);
        assert_eq!(bucket.get(CallEvent::Succ), u64::MAX);
    }

    #[test]
    fn concurrent() {
        let bucket = Arc::new(CallBucket::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let bucket = bucket.clone();
            handles.push(spawn(move || {
                for _ in 0..100 {
                    bucket.add_with_latency(CallEvent::Succ, 50);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bucket.get(CallEvent::Succ), 10_000);
        let mut hist = [0u64; HISTOGRAM_SLOTS];
        bucket.merge_latency_into(&mut hist);
        assert_eq!(hist[LatencyHistogram::slot_of(50)], 10_000);
    }

    #[test]
    fn reset() {
        let bucket = CallBucket::new();
        bucket.add_with_latency(CallEvent::Timeout, 200);
        bucket.reset();
        assert_eq!(bucket.get(CallEvent::Timeout), 0);
        let mut hist = [0u64; HISTOGRAM_SLOTS];
        bucket.merge_latency_into(&mut hist);
        assert!(hist.iter().all(|&c| c == 0));
    }
}
