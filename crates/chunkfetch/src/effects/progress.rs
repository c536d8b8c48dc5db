use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::SpeedSampler;
use crate::data::{FetchPhase, Progress, ProgressCallback, Settings};

/// Feeds transferred bytes into the global sampler and forwards throttled
/// snapshots to the caller's progress callback.
pub struct ProgressReporter {
    callback:  Option<ProgressCallback>,
    interval:  Duration,
    attempt:   u32,
    total:     Mutex<Option<u64>>,
    received:  AtomicU64,
    sampler:   SpeedSampler,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(settings: &Settings, attempt: u32) -> Self {
        Self {
            callback: settings.emit_progress.then(|| settings.on_progress.clone()).flatten(),
            interval: settings.progress_interval,
            attempt,
            total: Mutex::new(None),
            received: AtomicU64::new(0),
            sampler: SpeedSampler::default(),
            last_emit: Mutex::new(None),
        }
    }

    pub fn set_total(&self, total: Option<u64>) { *self.total.lock() = total; }

    /// Count `bytes` as received; emits at most once per interval.
    pub fn record(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
        let speed = self.sampler.add_sample(bytes);
        tracing::trace!(bytes, speed, "transfer progress");

        if self.callback.is_none() {
            return;
        }
        let now = Instant::now();
        {
            let mut last = self.last_emit.lock();
            if last.is_some_and(|at| now.duration_since(at) < self.interval) {
                return;
            }
            *last = Some(now);
        }
        self.emit(FetchPhase::Downloading, speed);
    }

    /// Announce a phase change; never throttled.
    pub fn phase(&self, phase: FetchPhase) { self.emit(phase, self.sampler.current_speed()); }

    pub fn bytes_received(&self) -> u64 { self.received.load(Ordering::Relaxed) }

    fn emit(&self, phase: FetchPhase, speed: f64) {
        if let Some(callback) = &self.callback {
            let total = *self.total.lock();
            callback(&Progress::new(phase, speed, self.bytes_received(), total, self.attempt));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn capture(settings: Settings) -> (ProgressReporter, Arc<Mutex<Vec<Progress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let settings = settings.on_progress(Arc::new(move |p: &Progress| sink.lock().push(p.clone())));
        (ProgressReporter::new(&settings, 0), seen)
    }

    #[test]
    fn record_is_throttled() {
        let (reporter, seen) = capture(Settings::default().progress_interval(Duration::from_secs(60)));
        reporter.set_total(Some(1000));
        for _ in 0..10 {
            reporter.record(100);
        }
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes_received, 100);
        assert_eq!(reporter.bytes_received(), 1000);
    }

    #[test]
    fn overlapping_bytes_do_not_overshoot_total() {
        let (reporter, seen) = capture(Settings::default().progress_interval(Duration::ZERO));
        reporter.set_total(Some(1000));
        for _ in 0..4 {
            reporter.record(251);
        }
        let last = seen.lock().last().cloned().unwrap();
        assert_eq!(last.bytes_received, 1000);
        assert_eq!(last.total_bytes, Some(1000));
        assert_eq!(reporter.bytes_received(), 1004);
    }

    #[test]
    fn phases_are_not_throttled() {
        let (reporter, seen) = capture(Settings::default().progress_interval(Duration::from_secs(60)));
        reporter.record(10);
        reporter.phase(FetchPhase::Assembling);
        reporter.phase(FetchPhase::Completed);

        let phases: Vec<_> = seen.lock().iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![FetchPhase::Downloading, FetchPhase::Assembling, FetchPhase::Completed]
        );
    }

    #[test]
    fn disabled_progress_never_calls_back() {
        let (reporter, seen) = capture(Settings::default().emit_progress(false));
        reporter.record(10);
        reporter.phase(FetchPhase::Completed);
        assert!(seen.lock().is_empty());
        assert_eq!(reporter.bytes_received(), 10);
    }
}
