use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

/// Samples older than this are dropped from the window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// The window never holds more samples than this.
pub const DEFAULT_MAX_SAMPLES: usize = 20;

/// `oldest` value while the pruner has not seen any sample.
const EMPTY: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
struct Sample {
    /// Nanoseconds since the sampler's origin.
    at:    u64,
    bytes: u64,
}

/// Sliding-window throughput estimator.
///
/// Appends go through a lock-free queue and the window's byte count, length
/// and time span are kept in atomics, so concurrent callers never wait on
/// each other. The mutex is taken only when the window is over its count or
/// age limit and must be pruned. It guards the oldest live sample, which the
/// pruner holds outside the queue so its timestamp stays readable.
#[derive(Debug)]
pub struct SpeedSampler {
    window:       Duration,
    max_samples:  usize,
    origin:       Instant,
    total:        AtomicU64,
    window_bytes: AtomicU64,
    len:          AtomicUsize,
    oldest:       AtomicU64,
    newest:       AtomicU64,
    queue:        SegQueue<Sample>,
    front:        Mutex<Option<Sample>>,
}

impl Default for SpeedSampler {
    fn default() -> Self { Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES) }
}

impl SpeedSampler {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            window,
            max_samples: max_samples.max(2),
            origin: Instant::now(),
            total: AtomicU64::new(0),
            window_bytes: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            oldest: AtomicU64::new(EMPTY),
            newest: AtomicU64::new(0),
            queue: SegQueue::new(),
            front: Mutex::new(None),
        }
    }

    /// Record `bytes` received now and return the current speed.
    pub fn add_sample(&self, bytes: u64) -> f64 { self.add_sample_at(Instant::now(), bytes) }

    /// Record `bytes` received at `at` and return the speed of the window.
    pub fn add_sample_at(&self, at: Instant, bytes: u64) -> f64 {
        let sample = Sample {
            at: self.offset(at),
            bytes,
        };
        self.total.fetch_add(bytes, Ordering::Relaxed);
        // Counters first: a concurrent prune may pop the sample right after the push.
        self.window_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.len.fetch_add(1, Ordering::AcqRel);
        self.newest.fetch_max(sample.at, Ordering::AcqRel);
        self.queue.push(sample);

        let now = self.offset(at.max(Instant::now()));
        if self.needs_prune(now) {
            self.prune(now);
        }
        self.speed()
    }

    /// Bytes per second over the live window; `0.0` with fewer than two samples.
    pub fn current_speed(&self) -> f64 {
        let now = self.offset(Instant::now());
        if self.needs_prune(now) {
            self.prune(now);
        }
        self.speed()
    }

    /// Bytes recorded since creation or the last reset, window or not.
    pub fn total_bytes(&self) -> u64 { self.total.load(Ordering::Relaxed) }

    pub fn reset(&self) {
        let mut front = self.front.lock();
        *front = None;
        while self.queue.pop().is_some() {}
        self.window_bytes.store(0, Ordering::Release);
        self.len.store(0, Ordering::Release);
        self.oldest.store(EMPTY, Ordering::Release);
        self.newest.store(0, Ordering::Release);
        self.total.store(0, Ordering::Relaxed);
    }

    fn offset(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.origin).as_nanos()).unwrap_or(u64::MAX - 1)
    }

    fn needs_prune(&self, now: u64) -> bool {
        let len = self.len.load(Ordering::Acquire);
        if len == 0 {
            return false;
        }
        let oldest = self.oldest.load(Ordering::Acquire);
        len > self.max_samples
            || oldest == EMPTY
            || Duration::from_nanos(now.saturating_sub(oldest)) > self.window
    }

    /// Drop samples beyond the count limit or older than the window, then
    /// park the oldest survivor in `front` and publish its timestamp.
    fn prune(&self, now: u64) {
        let mut front = self.front.lock();
        loop {
            let next = match front.take() {
                Some(sample) => Some(sample),
                None => self.queue.pop(),
            };
            let Some(sample) = next else {
                self.oldest.store(EMPTY, Ordering::Release);
                return;
            };

            let stale = Duration::from_nanos(now.saturating_sub(sample.at)) > self.window;
            if stale || self.len.load(Ordering::Acquire) > self.max_samples {
                self.window_bytes.fetch_sub(sample.bytes, Ordering::AcqRel);
                self.len.fetch_sub(1, Ordering::AcqRel);
                continue;
            }

            self.oldest.store(sample.at, Ordering::Release);
            *front = Some(sample);
            return;
        }
    }

    fn speed(&self) -> f64 {
        if self.len.load(Ordering::Acquire) < 2 {
            return 0.0;
        }
        let oldest = self.oldest.load(Ordering::Acquire);
        if oldest == EMPTY {
            return 0.0;
        }
        let elapsed = Duration::from_nanos(self.newest.load(Ordering::Acquire).saturating_sub(oldest));
        if elapsed < Duration::from_millis(1) {
            return 0.0;
        }
        self.window_bytes.load(Ordering::Acquire) as f64 / elapsed.as_secs_f64()
    }

    #[cfg(test)]
    fn window_len(&self) -> usize { self.len.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_two_samples() {
        let sampler = SpeedSampler::default();
        assert_eq!(sampler.current_speed(), 0.0);
        assert_eq!(sampler.add_sample(100), 0.0);
        assert_eq!(sampler.total_bytes(), 100);
    }

    #[test]
    fn speed_over_window() {
        let sampler = SpeedSampler::default();
        let base = Instant::now();
        sampler.add_sample_at(base, 1000);
        sampler.add_sample_at(base + Duration::from_secs(1), 1000);
        let speed = sampler.add_sample_at(base + Duration::from_secs(2), 1000);
        assert!((speed - 1500.0).abs() < 1.0, "speed was {speed}");
    }

    #[test]
    fn old_samples_leave_the_window() {
        let sampler = SpeedSampler::new(Duration::from_secs(5), 20);
        let base = Instant::now();
        sampler.add_sample_at(base, 1_000_000);
        sampler.add_sample_at(base + Duration::from_secs(1), 1_000_000);
        sampler.add_sample_at(base + Duration::from_secs(60), 10);
        let speed = sampler.add_sample_at(base + Duration::from_secs(61), 10);

        assert!(speed < 100.0, "stale samples leaked into {speed}");
        assert_eq!(sampler.window_len(), 2);
        assert_eq!(sampler.total_bytes(), 2_000_020);
    }

    #[test]
    fn window_is_bounded_by_count() {
        let sampler = SpeedSampler::new(Duration::from_secs(60), 4);
        let base = Instant::now();
        let mut speed = 0.0;
        for i in 0..10u64 {
            speed = sampler.add_sample_at(base + Duration::from_millis(i * 100), 100);
        }
        assert_eq!(sampler.window_len(), 4);
        // samples 6..=9: 400 bytes over 300ms
        assert!((speed - 400.0 / 0.3).abs() < 1.0, "speed was {speed}");
    }

    #[test]
    fn concurrent_samples_are_all_counted() {
        let sampler = SpeedSampler::new(Duration::from_secs(60), 10_000);
        let base = Instant::now();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for i in 0..100u64 {
                        sampler.add_sample_at(base + Duration::from_millis(i * 10), 10);
                    }
                });
            }
        });

        assert_eq!(sampler.total_bytes(), 8_000);
        assert_eq!(sampler.window_len(), 800);
        // every thread starts at `base` and ends 990ms later
        let speed = sampler.current_speed();
        assert!((speed - 8_000.0 / 0.99).abs() < 1.0, "speed was {speed}");
    }

    #[test]
    fn reset_zeroes_everything() {
        let sampler = SpeedSampler::default();
        let base = Instant::now();
        sampler.add_sample_at(base, 500);
        sampler.add_sample_at(base + Duration::from_secs(1), 500);
        assert!(sampler.current_speed() > 0.0);

        sampler.reset();
        assert_eq!(sampler.total_bytes(), 0);
        assert_eq!(sampler.window_len(), 0);
        assert_eq!(sampler.current_speed(), 0.0);
    }
}
