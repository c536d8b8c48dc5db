use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chunkfetch_fs::ScratchDir;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::chunk::ChunkState;
use crate::core::{partition, split_range};
use crate::data::ByteRange;

/// Speed-triggered retries allowed per range lineage.
pub const MAX_SLOW_RETRIES: u32 = 3;

/// Longest an idle worker sleeps before re-checking the queue.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Ledger {
    failures:     HashMap<(u64, u64), u32>,
    slow_retries: HashMap<(u64, u64), u32>,
    completed:    HashSet<(u64, u64)>,
    speed_sum:    f64,
    global_speed: f64,
}

/// Pending queue, chunk states and retry bookkeeping of one attempt.
///
/// Shared by reference between workers. Each collection has its own short
/// lock, none of which is held across an await point.
#[derive(Debug)]
pub struct ChunkRegistry {
    scratch:        ScratchDir,
    stem:           String,
    parts:          usize,
    min_chunk_size: u64,
    retry_limit:    u32,
    slow_check:     Duration,
    pending:        Mutex<VecDeque<ByteRange>>,
    states:         Mutex<HashMap<ByteRange, Arc<ChunkState>>>,
    ledger:         Mutex<Ledger>,
    active:         AtomicUsize,
    abandoned:      AtomicBool,
    wakeup:         Notify,
}

impl ChunkRegistry {
    /// `parts` is the split fan-out; `retry_limit == 0` retries forever.
    pub fn new(
        scratch: ScratchDir,
        stem: impl Into<String>,
        parts: usize,
        min_chunk_size: u64,
        retry_limit: u32,
    ) -> Self {
        Self {
            scratch,
            stem: stem.into(),
            parts: parts.max(1),
            min_chunk_size,
            retry_limit,
            slow_check: super::chunk::SLOW_CHECK_INTERVAL,
            pending: Mutex::new(VecDeque::new()),
            states: Mutex::new(HashMap::new()),
            ledger: Mutex::new(Ledger::default()),
            active: AtomicUsize::new(0),
            abandoned: AtomicBool::new(false),
            wakeup: Notify::new(),
        }
    }

    /// Spacing of the slow-speed check of every chunk handed out.
    #[must_use]
    pub fn slow_check_interval(mut self, interval: Duration) -> Self {
        self.slow_check = interval;
        self
    }

    /// A range with a fresh temp path.
    pub fn new_range(&self, start: u64, end: u64, generation: u32) -> ByteRange {
        ByteRange::new(start, end, generation, self.scratch.unique_path(&self.stem, "part"))
    }

    /// Initial ranges for a file of `file_length` bytes.
    pub fn partition(&self, file_length: u64) -> Vec<ByteRange> {
        partition(file_length, self.parts)
            .into_iter()
            .map(|(start, end)| self.new_range(start, end, 0))
            .collect()
    }

    /// Even split of `range` into `parts` ranges one generation deeper.
    pub fn split_range(&self, range: &ByteRange, parts: usize) -> Vec<ByteRange> {
        split_range(range.start, range.end, parts)
            .into_iter()
            .map(|(start, end)| self.new_range(start, end, range.generation + 1))
            .collect()
    }

    pub fn initialize_chunks(&self, ranges: impl IntoIterator<Item = ByteRange>) {
        self.pending.lock().extend(ranges);
        self.wakeup.notify_waiters();
    }

    /// Claim the next pending range.
    ///
    /// The caller counts as active until it calls
    /// [`release_active`](Self::release_active). Returns `None` when nothing
    /// is pending or the attempt was abandoned.
    pub fn try_get_next_chunk(&self) -> Option<(ByteRange, Arc<ChunkState>)> {
        loop {
            if self.abandoned.load(Ordering::Acquire) {
                return None;
            }

            let range = {
                let mut pending = self.pending.lock();
                let range = pending.pop_front()?;
                self.active.fetch_add(1, Ordering::AcqRel);
                range
            };

            let (expected, slow_retries) = {
                let ledger = self.ledger.lock();
                (ledger.global_speed, ledger.slow_retries.get(&range.key()).copied().unwrap_or(0))
            };
            let state = Arc::new(
                ChunkState::new(range.clone(), expected, slow_retries).check_interval(self.slow_check),
            );

            let mut states = self.states.lock();
            if states.contains_key(&range) {
                drop(states);
                tracing::debug!(range = %range, "range already claimed, skipping");
                self.release_active();
                continue;
            }
            states.insert(range.clone(), state.clone());
            return Some((range, state));
        }
    }

    /// Mark one claimed range as processed. Call after any re-enqueueing.
    pub fn release_active(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.wakeup.notify_waiters();
    }

    /// Nothing pending and nothing in flight, or abandoned.
    pub fn is_drained(&self) -> bool {
        if self.abandoned.load(Ordering::Acquire) {
            return true;
        }
        let pending = self.pending.lock();
        pending.is_empty() && self.active.load(Ordering::Acquire) == 0
    }

    /// Park an idle worker until work may have appeared.
    pub async fn wait_for_work(&self) {
        let _ = tokio::time::timeout(IDLE_POLL, self.wakeup.notified()).await;
    }

    /// Count a finished chunk once and fold its speed into the global average.
    ///
    /// Returns `false` if the state is incomplete or was already counted.
    pub fn complete_chunk(&self, state: &ChunkState) -> bool {
        if !state.is_completed() {
            return false;
        }
        let mut ledger = self.ledger.lock();
        if !ledger.completed.insert(state.range().key()) {
            return false;
        }
        ledger.speed_sum += state.average_speed();
        ledger.global_speed = ledger.speed_sum / ledger.completed.len() as f64;
        true
    }

    /// Decide what happens to a failed range: `true` to continue the attempt,
    /// `false` when the range is abandoned.
    ///
    /// With `can_split`, progress, and more than `min_chunk_size` bytes left,
    /// the downloaded prefix is kept as a completed chunk and the rest is
    /// split. Otherwise the whole range is queued again with a fresh temp
    /// file until it has failed `retry_limit` times.
    pub fn handle_chunk_failure(&self, range: &ByteRange, state: &Arc<ChunkState>, can_split: bool) -> bool {
        let downloaded = state.bytes_downloaded();
        let remaining = range.len().saturating_sub(downloaded);

        if can_split
            && downloaded > 0
            && remaining > self.min_chunk_size
            && let Some(prefix) = state.downloaded_range()
        {
            let (start, end) = state.remaining_span();
            let tail = ByteRange::new(start, end, range.generation, range.temp_path());
            let pieces = self.split_range(&tail, self.parts);
            tracing::debug!(
                range = %range,
                downloaded,
                pieces = pieces.len(),
                generation = range.generation + 1,
                "splitting failed chunk"
            );

            self.install_prefix(range, state, prefix);
            self.enqueue(pieces);
            return true;
        }

        let failures = {
            let mut ledger = self.ledger.lock();
            let count = ledger.failures.entry(range.key()).or_default();
            *count += 1;
            *count
        };

        if self.retry_limit == 0 || failures < self.retry_limit {
            tracing::debug!(range = %range, failures, "retrying chunk");
            self.states.lock().remove(range);
            self.enqueue([self.new_range(range.start, range.end, range.generation)]);
            return true;
        }

        tracing::warn!(range = %range, failures, "abandoning chunk");
        self.abandoned.store(true, Ordering::Release);
        self.wakeup.notify_waiters();
        false
    }

    /// Restart a slow range: only the missing tail when some bytes arrived.
    pub fn handle_slow_chunk(&self, range: &ByteRange, state: &Arc<ChunkState>) {
        let retries = state.slow_retries() + 1;

        let next = match state.downloaded_range() {
            Some(prefix) if !state.is_completed() => {
                let (start, end) = state.remaining_span();
                self.install_prefix(range, state, prefix);
                self.new_range(start, end, range.generation)
            }
            _ => {
                self.states.lock().remove(range);
                self.new_range(range.start, range.end, range.generation)
            }
        };

        tracing::debug!(range = %range, next = %next, retries, "re-queueing slow chunk");
        self.ledger.lock().slow_retries.insert(next.key(), retries);
        self.enqueue([next]);
    }

    /// Replace `range`'s state with a completed one covering `prefix`, which
    /// takes over the temp file.
    fn install_prefix(&self, range: &ByteRange, state: &ChunkState, prefix: ByteRange) {
        let salvaged = Arc::new(ChunkState::completed_prefix(prefix.clone(), state.average_speed()));
        state.release_file();

        {
            let mut states = self.states.lock();
            states.remove(range);
            states.insert(prefix, salvaged.clone());
        }
        self.complete_chunk(&salvaged);
    }

    fn enqueue(&self, ranges: impl IntoIterator<Item = ByteRange>) {
        self.pending.lock().extend(ranges);
        self.wakeup.notify_waiters();
    }

    pub fn is_abandoned(&self) -> bool { self.abandoned.load(Ordering::Acquire) }

    pub fn failure_count(&self, range: &ByteRange) -> u32 {
        self.ledger.lock().failures.get(&range.key()).copied().unwrap_or(0)
    }

    /// Nothing pending, nothing abandoned, and every known state complete.
    pub fn all_chunks_completed(&self) -> bool {
        if self.is_abandoned() || !self.pending.lock().is_empty() {
            return false;
        }
        let states = self.states.lock();
        !states.is_empty() && states.values().all(|s| s.is_completed())
    }

    /// Completed chunks sorted by start offset.
    pub fn completed_chunks_in_order(&self) -> Vec<Arc<ChunkState>> {
        let mut chunks: Vec<_> = self
            .states
            .lock()
            .values()
            .filter(|s| s.is_completed())
            .cloned()
            .collect();
        chunks.sort_by_key(|s| s.range().key());
        chunks
    }

    pub fn completed_count(&self) -> usize { self.ledger.lock().completed.len() }

    pub fn state_count(&self) -> usize { self.states.lock().len() }

    pub fn total_downloaded_bytes(&self) -> u64 {
        self.states.lock().values().map(|s| s.bytes_downloaded()).sum()
    }

    /// Mean of completed chunks' average speeds, in bytes per second.
    pub fn global_average_speed(&self) -> f64 { self.ledger.lock().global_speed }

    /// Drop every pending range and state; owned temp files are deleted.
    pub fn clear(&self) {
        self.pending.lock().clear();
        let states: Vec<_> = self.states.lock().drain().collect();
        drop(states);
        *self.ledger.lock() = Ledger::default();
        self.abandoned.store(false, Ordering::Release);
    }
}

impl Drop for ChunkRegistry {
    fn drop(&mut self) { self.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &tempfile::TempDir, parts: usize, retry_limit: u32) -> ChunkRegistry {
        let scratch = ScratchDir::new(dir.path()).unwrap();
        ChunkRegistry::new(scratch, "file.bin", parts, 16, retry_limit)
    }

    fn claim(registry: &ChunkRegistry) -> (ByteRange, Arc<ChunkState>) {
        registry.try_get_next_chunk().expect("a pending chunk")
    }

    #[test]
    fn hands_out_ranges_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 4, 5);
        registry.initialize_chunks(registry.partition(1000));

        let keys: Vec<_> = std::iter::from_fn(|| registry.try_get_next_chunk())
            .map(|(r, _)| r.key())
            .collect();
        assert_eq!(keys, vec![(0, 250), (250, 500), (500, 750), (750, 999)]);
        assert!(!registry.is_drained());

        for _ in 0..4 {
            registry.release_active();
        }
        assert!(registry.is_drained());
    }

    #[test]
    fn completion_is_counted_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 1, 5);
        registry.initialize_chunks(registry.partition(100));

        let (_, state) = claim(&registry);
        assert!(!registry.complete_chunk(&state));
        state.update_progress(100);
        assert!(registry.complete_chunk(&state));
        assert!(!registry.complete_chunk(&state));
        assert!(!registry.complete_chunk(&state));
        assert_eq!(registry.completed_count(), 1);

        registry.release_active();
        assert!(registry.all_chunks_completed());
    }

    #[test]
    fn failure_with_progress_splits_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 4, 5);
        registry.initialize_chunks([registry.new_range(0, 999, 0)]);

        let (range, state) = claim(&registry);
        state.update_progress(500);
        assert!(registry.handle_chunk_failure(&range, &state, true));
        registry.release_active();

        let mut pieces = Vec::new();
        while let Some((r, s)) = registry.try_get_next_chunk() {
            assert_eq!(r.generation, 1);
            s.update_progress(r.len());
            registry.complete_chunk(&s);
            registry.release_active();
            pieces.push(r.key());
        }
        assert_eq!(pieces.first().map(|k| k.0), Some(499));
        assert_eq!(pieces.last().map(|k| k.1), Some(999));

        let chunks = registry.completed_chunks_in_order();
        assert_eq!(chunks[0].range().key(), (0, 499));
        let assembled: u64 = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| c.range().len() - u64::from(i > 0))
            .sum();
        assert_eq!(assembled, 1000);
        assert!(registry.all_chunks_completed());
    }

    #[test]
    fn failure_without_split_retries_then_abandons() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 4, 3);
        registry.initialize_chunks([registry.new_range(0, 999, 0)]);

        let mut paths = HashSet::new();
        for _ in 0..2 {
            let (range, state) = claim(&registry);
            paths.insert(range.temp_path().to_path_buf());
            assert!(registry.handle_chunk_failure(&range, &state, false));
            registry.release_active();
        }
        let (range, state) = claim(&registry);
        paths.insert(range.temp_path().to_path_buf());
        assert_eq!(paths.len(), 3, "every retry gets a fresh temp file");

        assert!(!registry.handle_chunk_failure(&range, &state, false));
        assert_eq!(registry.failure_count(&range), 3);
        assert!(registry.is_abandoned());
        assert!(registry.is_drained());
        assert!(registry.try_get_next_chunk().is_none());
        assert!(!registry.all_chunks_completed());
    }

    #[test]
    fn zero_limit_never_abandons() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 1, 0);
        registry.initialize_chunks(registry.partition(100));

        for _ in 0..50 {
            let (range, state) = claim(&registry);
            assert!(registry.handle_chunk_failure(&range, &state, false));
            registry.release_active();
        }
    }

    #[test]
    fn small_remainder_is_not_split() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 4, 5);
        registry.initialize_chunks([registry.new_range(0, 19, 0)]);

        let (range, state) = claim(&registry);
        state.update_progress(10);
        assert!(registry.handle_chunk_failure(&range, &state, true));
        registry.release_active();

        let (again, _) = claim(&registry);
        assert_eq!(again.key(), (0, 19));
        assert_eq!(again.generation, 0);
    }

    #[test]
    fn slow_chunk_requeues_tail() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 4, 5);
        registry.initialize_chunks([registry.new_range(0, 999, 0)]);

        let (range, state) = claim(&registry);
        state.update_progress(300);
        registry.handle_slow_chunk(&range, &state);
        registry.release_active();

        let (tail, tail_state) = claim(&registry);
        assert_eq!(tail.key(), (299, 999));
        assert_eq!(tail_state.slow_retries(), 1);

        registry.handle_slow_chunk(&tail, &tail_state);
        registry.release_active();
        let (whole, whole_state) = claim(&registry);
        assert_eq!(whole.key(), (299, 999));
        assert_eq!(whole_state.slow_retries(), 2);
    }

    #[test]
    fn clear_deletes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 2, 5);
        registry.initialize_chunks(registry.partition(100));

        let (range, state) = claim(&registry);
        std::fs::write(range.temp_path(), b"partial").unwrap();
        drop(state);
        registry.release_active();

        registry.clear();
        assert!(registry.try_get_next_chunk().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn global_average_is_mean_of_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, 1, 5);

        let fast = ChunkState::completed_prefix(registry.new_range(0, 9, 0), 300.0);
        let slow = ChunkState::completed_prefix(registry.new_range(9, 19, 0), 100.0);
        registry.complete_chunk(&fast);
        registry.complete_chunk(&slow);
        assert_eq!(registry.global_average_speed(), 200.0);
    }
}
