use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::fs::File;

use crate::core::{SpeedSampler, downloaded_span, remaining_span};
use crate::data::ByteRange;

/// Default spacing of the slow-chunk check.
pub const SLOW_CHECK_INTERVAL: Duration = Duration::from_secs(3);

/// A chunk is slow below this fraction of its expected speed.
pub const SLOW_SPEED_RATIO: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct SpeedCheck {
    at:    Instant,
    bytes: u64,
}

/// Progress of one range plus ownership of its temp file.
///
/// The file is deleted when the state is dropped unless it was handed to
/// another state with [`release_file`](Self::release_file).
#[derive(Debug)]
pub struct ChunkState {
    range:          ByteRange,
    downloaded:     AtomicU64,
    slow_retries:   u32,
    expected_speed: f64,
    check_interval: Duration,
    sampler:        SpeedSampler,
    started_at:     Instant,
    check:          Mutex<SpeedCheck>,
    carried_speed:  Option<f64>,
    owns_file:      AtomicBool,
}

impl ChunkState {
    /// Fresh state for a range about to be fetched. `expected_speed` is the
    /// baseline for slow detection; `0.0` disables it.
    pub fn new(range: ByteRange, expected_speed: f64, slow_retries: u32) -> Self {
        let now = Instant::now();
        Self {
            range,
            downloaded: AtomicU64::new(0),
            slow_retries,
            expected_speed,
            check_interval: SLOW_CHECK_INTERVAL,
            sampler: SpeedSampler::default(),
            started_at: now,
            check: Mutex::new(SpeedCheck { at: now, bytes: 0 }),
            carried_speed: None,
            owns_file: AtomicBool::new(true),
        }
    }

    /// Already-completed state for bytes salvaged from an interrupted fetch.
    pub fn completed_prefix(range: ByteRange, average_speed: f64) -> Self {
        let len = range.len();
        let mut state = Self::new(range, 0.0, 0);
        state.downloaded = AtomicU64::new(len);
        state.carried_speed = Some(average_speed);
        state
    }

    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn range(&self) -> &ByteRange { &self.range }

    /// Speed-triggered retries this range's lineage has used.
    pub fn slow_retries(&self) -> u32 { self.slow_retries }

    /// Record `bytes` written to the temp file; returns this chunk's current speed.
    pub fn update_progress(&self, bytes: u64) -> f64 {
        self.downloaded.fetch_add(bytes, Ordering::AcqRel);
        self.sampler.add_sample(bytes)
    }

    pub fn bytes_downloaded(&self) -> u64 { self.downloaded.load(Ordering::Acquire) }

    pub fn is_completed(&self) -> bool { self.bytes_downloaded() >= self.range.len() }

    pub fn is_too_slow(&self) -> bool { self.is_too_slow_at(Instant::now()) }

    /// Compare the rate since the last check against the baseline, at most
    /// once per check interval ([`SLOW_CHECK_INTERVAL`] unless configured).
    pub fn is_too_slow_at(&self, now: Instant) -> bool {
        if self.expected_speed <= 0.0 {
            return false;
        }

        let mut check = self.check.lock();
        let elapsed = now.saturating_duration_since(check.at);
        if elapsed < self.check_interval {
            return false;
        }

        let downloaded = self.bytes_downloaded();
        let rate = downloaded.saturating_sub(check.bytes) as f64 / elapsed.as_secs_f64();
        *check = SpeedCheck {
            at:    now,
            bytes: downloaded,
        };
        rate < self.expected_speed * SLOW_SPEED_RATIO
    }

    /// The prefix already on disk, backed by this state's temp file.
    pub fn downloaded_range(&self) -> Option<ByteRange> {
        downloaded_span(self.range.start, self.range.end, self.bytes_downloaded())
            .map(|(start, end)| ByteRange::new(start, end, self.range.generation, self.range.temp_path()))
    }

    /// Offsets still to fetch; overlaps the downloaded prefix by one byte.
    pub fn remaining_span(&self) -> (u64, u64) {
        remaining_span(self.range.start, self.range.end, self.bytes_downloaded())
    }

    /// Bytes per second since the state was created.
    pub fn average_speed(&self) -> f64 {
        if let Some(speed) = self.carried_speed {
            return speed;
        }
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.bytes_downloaded() as f64 / elapsed
    }

    /// Hand the temp file to another owner; dropping this state keeps it.
    pub fn release_file(&self) { self.owns_file.store(false, Ordering::Release); }

    /// Delete the temp file now and forget its contents.
    pub fn discard(&self) {
        self.downloaded.store(0, Ordering::Release);
        self.sampler.reset();
        if let Err(e) = chunkfetch_fs::remove_quietly(self.range.temp_path()) {
            tracing::warn!(range = %self.range, error = %e, "failed to discard chunk file");
        }
    }

    /// Create (or truncate) the temp file for writing.
    pub async fn create_file(&self) -> std::io::Result<File> { File::create(self.range.temp_path()).await }
}

impl Drop for ChunkState {
    fn drop(&mut self) {
        if self.owns_file.load(Ordering::Acquire)
            && let Err(e) = chunkfetch_fs::remove_quietly(self.range.temp_path())
        {
            tracing::warn!(range = %self.range, error = %e, "failed to remove chunk file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_in(dir: &tempfile::TempDir, start: u64, end: u64) -> ByteRange {
        ByteRange::new(start, end, 0, dir.path().join(format!("{start}-{end}.part")))
    }

    #[test]
    fn progress_is_monotonic_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 0, 99), 0.0, 0);

        let mut last = 0;
        for step in [10, 0, 30, 60] {
            state.update_progress(step);
            assert!(state.bytes_downloaded() >= last);
            last = state.bytes_downloaded();
        }
        assert_eq!(state.bytes_downloaded(), 100);
        assert!(state.is_completed());
    }

    #[test]
    fn prefix_and_remaining_cover_range() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 1000, 1999), 0.0, 0);
        assert!(state.downloaded_range().is_none());
        assert_eq!(state.remaining_span(), (1000, 1999));

        state.update_progress(400);
        let prefix = state.downloaded_range().unwrap();
        assert_eq!(prefix.key(), (1000, 1399));
        assert_eq!(prefix.temp_path(), state.range().temp_path());
        assert_eq!(state.remaining_span(), (1399, 1999));
    }

    #[test]
    fn slow_check_runs_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 0, 1 << 20), 10_000.0, 0);
        let start = Instant::now();

        state.update_progress(100);
        assert!(!state.is_too_slow_at(start + Duration::from_secs(1)));
        // 100 bytes over 3s is far below 10% of 10 kB/s.
        assert!(state.is_too_slow_at(start + Duration::from_secs(3)));

        // Window reset: 30 kB over the next 3s is fast enough.
        state.update_progress(30_000);
        assert!(!state.is_too_slow_at(start + Duration::from_secs(6)));
    }

    #[test]
    fn check_interval_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 0, 1 << 20), 10_000.0, 0)
            .check_interval(Duration::from_millis(100));
        let start = Instant::now();

        state.update_progress(10);
        assert!(!state.is_too_slow_at(start + Duration::from_millis(50)));
        assert!(state.is_too_slow_at(start + Duration::from_millis(150)));
    }

    #[test]
    fn no_baseline_never_slow() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 0, 99), 0.0, 0);
        assert!(!state.is_too_slow_at(Instant::now() + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn drop_removes_owned_file() {
        let dir = tempfile::tempdir().unwrap();
        let range = range_in(&dir, 0, 9);
        let path = range.temp_path().to_path_buf();

        let state = ChunkState::new(range, 0.0, 0);
        drop(state.create_file().await.unwrap());
        assert!(path.exists());
        drop(state);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn released_file_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 0, 9), 0.0, 0);
        drop(state.create_file().await.unwrap());
        state.update_progress(4);

        let prefix = ChunkState::completed_prefix(state.downloaded_range().unwrap(), 12.0);
        state.release_file();
        drop(state);

        assert!(prefix.range().temp_path().exists());
        assert!(prefix.is_completed());
        assert_eq!(prefix.average_speed(), 12.0);
        let path = prefix.range().temp_path().to_path_buf();
        drop(prefix);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn discard_deletes_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let state = ChunkState::new(range_in(&dir, 0, 9), 0.0, 0);
        drop(state.create_file().await.unwrap());
        state.update_progress(5);

        state.discard();
        assert_eq!(state.bytes_downloaded(), 0);
        assert!(!state.range().temp_path().exists());
    }
}
