use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use recsync_protocol::TransferProgress;

/// Caller-supplied progress sink.
pub type ProgressFn = dyn Fn(TransferProgress) + Send + Sync;

/// Span of recent history the throughput estimate covers.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Upper bound on retained samples regardless of window.
const MAX_SAMPLES: usize = 64;

/// Throughput over a sliding time window.
///
/// The oldest retained sample only anchors the window start; its bytes
/// moved before it and are not counted.
pub struct ThroughputWindow {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ThroughputWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    /// Notes that `bytes` finished moving just now.
    pub fn record(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&self, now: Instant, bytes: u64) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back((now, bytes));
        while let Some(&(at, _)) = samples.front() {
            let expired = now.duration_since(at) > self.window;
            if expired || samples.len() > MAX_SAMPLES {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second across the window, 0.0 until two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(&(start, _)), Some(&(end, _))) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let elapsed = end.duration_since(start).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let moved: u64 = samples.iter().skip(1).map(|&(_, bytes)| bytes).sum();
        moved as f64 / elapsed
    }
}
