//! Frame-processing latency tracking
//!
//! Bounded sample history with percentile stats, safe for any mix of
//! recorders and readers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_CAPACITY: usize = 1000;

/// Summary statistics over the recorded window, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

impl LatencyStats {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl std::fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "no samples");
        }
        write!(
            f,
            "min={:.2}ms avg={:.2}ms max={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms (n={})",
            self.min_ms, self.mean_ms, self.max_ms, self.p50_ms, self.p95_ms, self.p99_ms, self.count
        )
    }
}

/// Bounded deque of latency samples behind a mutex
#[derive(Debug)]
pub struct LatencyTracker {
    samples: Mutex<VecDeque<f64>>,
    max_samples: usize,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(max_samples.min(DEFAULT_CAPACITY))),
            max_samples: max_samples.max(1),
        }
    }

    /// Record one elapsed duration as fractional milliseconds.
    pub fn record(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut samples = self.samples.lock().expect("latency tracker poisoned");
        samples.push_back(ms);
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
    }

    /// Stats over a sorted copy of the current window.
    pub fn stats(&self) -> LatencyStats {
        let sorted: Vec<f64> = {
            let samples = self.samples.lock().expect("latency tracker poisoned");
            let mut copy: Vec<f64> = samples.iter().copied().collect();
            copy.sort_by(|a, b| a.partial_cmp(b).expect("latency samples are finite"));
            copy
        };

        let count = sorted.len();
        if count == 0 {
            return LatencyStats::default();
        }

        let percentile = |k: f64| {
            let idx = ((count as f64 * k) as usize).min(count - 1);
            sorted[idx]
        };

        LatencyStats {
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            mean_ms: sorted.iter().sum::<f64>() / count as f64,
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            count,
        }
    }

    pub fn reset(&self) {
        self.samples.lock().expect("latency tracker poisoned").clear();
    }
}
