use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Progress snapshot delivered after each completed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// 0..=100. Reaches 100 only once every chunk has completed.
    pub percent: u8,
    /// Smoothed throughput in bytes per second.
    pub speed_bytes_per_second: f64,
}

impl ProgressState {
    pub fn new(percent: u8, speed_bytes_per_second: f64) -> Self {
        Self {
            percent,
            speed_bytes_per_second,
        }
    }
}

/// Rounded completion percentage of `completed` out of `total` chunks.
///
/// Capped at 99 until `completed == total`, so 100 always means done.
/// An empty plan counts as complete.
pub fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 || completed >= total {
        return 100;
    }
    let rounded = (completed as f64 / total as f64 * 100.0).round() as u8;
    rounded.min(99)
}

/// Receives chunk-level notifications from hashing and upload loops.
///
/// Both methods default to no-ops. Any `Fn(ProgressState)` closure is an
/// observer that only cares about progress.
pub trait TransferObserver: Send + Sync {
    /// Called once per chunk, after it has been hashed or transferred.
    fn on_chunk_completed(&self, _index: u64, _bytes: u64, _elapsed: Duration) {}

    /// Called once per chunk, after `on_chunk_completed`.
    fn on_progress(&self, _progress: ProgressState) {}
}

impl<F> TransferObserver for F
where
    F: Fn(ProgressState) + Send + Sync,
{
    fn on_progress(&self, progress: ProgressState) {
        self(progress)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    started: Instant,
    finished: Instant,
}

/// Smooths per-chunk throughput over a sliding time window.
///
/// Speed is measured against wall-clock time, from the earliest start to the
/// latest finish among retained samples, so chunks that overlap in flight
/// are not double counted.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: how long samples stay relevant (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records that `bytes` took `elapsed` to move, finishing now.
    pub fn add_sample(&self, bytes: u64, elapsed: Duration) {
        self.record(bytes, elapsed, Instant::now());
    }

    fn record(&self, bytes: u64, elapsed: Duration, finished: Instant) {
        let mut s = self.lock();
        let started = finished.checked_sub(elapsed).unwrap_or(finished);
        s.samples.push(SpeedSample {
            bytes,
            started,
            finished,
        });

        if let Some(cutoff) = finished.checked_sub(s.window_size) {
            // The newest sample always survives, however long it took.
            let keep_from = s.samples.len() - 1;
            let mut index = 0;
            s.samples.retain(|sample| {
                let keep = index == keep_from || sample.finished >= cutoff;
                index += 1;
                keep
            });
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Bytes/second across retained samples, over the wall-clock span they
    /// cover.
    ///
    /// Returns 0.0 with no samples or no measurable elapsed time.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (
            s.samples.iter().map(|sample| sample.started).min(),
            s.samples.iter().map(|sample| sample.finished).max(),
        ) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(first);
        if span.is_zero() {
            return 0.0;
        }
        let bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        bytes as f64 / span.as_secs_f64()
    }

    /// Estimates time remaining to move `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        self.lock().samples.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn percent_rounds_and_caps() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 10), 0);
        // 199/200 would round to 100.
        assert_eq!(percent(199, 200), 99);
        assert_eq!(percent(200, 200), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn percent_is_monotonic() {
        let total = 257;
        let mut last = 0;
        for done in 0..=total {
            let p = percent(done, total);
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn closure_observer_receives_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = move |p: ProgressState| sink.lock().unwrap().push(p.percent);
        observer.on_chunk_completed(0, 10, Duration::from_millis(1));
        observer.on_progress(ProgressState::new(50, 0.0));
        assert_eq!(*seen.lock().unwrap(), vec![50]);
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::default();
        calc.add_sample(1000, Duration::from_millis(500));
        assert!((calc.bytes_per_second() - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn speed_calculator_back_to_back_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), None);
        let t0 = Instant::now();
        calc.record(1000, Duration::from_secs(1), t0 + Duration::from_secs(1));
        calc.record(3000, Duration::from_secs(1), t0 + Duration::from_secs(2));
        assert!((calc.bytes_per_second() - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn speed_calculator_overlapping_samples_use_wall_time() {
        // Three chunks in flight together, each taking 300 ms.
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), None);
        let finished = Instant::now() + Duration::from_secs(1);
        for _ in 0..3 {
            calc.record(1_000_000, Duration::from_millis(300), finished);
        }
        let expected = 3_000_000.0 / 0.3;
        assert!((calc.bytes_per_second() - expected).abs() < 1.0);
    }

    #[test]
    fn speed_calculator_includes_idle_gaps() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), None);
        let t0 = Instant::now();
        calc.record(1000, Duration::from_secs(1), t0 + Duration::from_secs(1));
        calc.record(1000, Duration::from_secs(1), t0 + Duration::from_secs(4));
        assert!((calc.bytes_per_second() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn speed_calculator_zero_elapsed() {
        let calc = SpeedCalculator::default();
        calc.add_sample(1000, Duration::ZERO);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_eta() {
        let calc = SpeedCalculator::default();
        calc.add_sample(1000, Duration::from_secs(1));
        let eta = calc.eta(10_000).unwrap();
        assert!((eta.as_secs_f64() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn speed_calculator_reset() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100, Duration::from_millis(10));
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10, Duration::from_millis(1));
        }
        assert!(calc.lock().samples.len() <= 5);
    }

    #[test]
    fn speed_calculator_window_keeps_newest() {
        let calc = SpeedCalculator::new(Some(Duration::from_millis(10)), None);
        calc.add_sample(1, Duration::from_secs(1));
        std::thread::sleep(Duration::from_millis(30));
        calc.add_sample(500, Duration::from_secs(1));
        assert_eq!(calc.lock().samples.len(), 1);
        assert!((calc.bytes_per_second() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn speed_calculator_concurrent_access() {
        use std::thread;

        let calc = Arc::new(SpeedCalculator::default());
        let mut handles = vec![];

        for _ in 0..10 {
            let c = Arc::clone(&calc);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    c.add_sample(1, Duration::from_micros(10));
                    let _ = c.bytes_per_second();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert!(calc.bytes_per_second() > 0.0);
    }
}
