use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chunkfetch_fs::ScratchDir;
use futures_util::StreamExt;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::assemble::assemble;
use super::chunk::ChunkState;
use super::fallback::SingleStreamFallback;
use super::http::{BoxStream, HttpClient};
use super::progress::ProgressReporter;
use super::registry::{ChunkRegistry, MAX_SLOW_RETRIES};
use crate::core::{PARTIAL_CONTENT, ProbeResponse, evaluate_probe};
use crate::data::{ByteRange, Completion, DownloadTask, FetchPhase, Settings, UrlInfo};
use crate::error::{AggregateError, FetchError, Result};

/// State that outlives a single attempt.
#[derive(Debug, Default)]
struct OperationState {
    url_info:        Option<UrlInfo>,
    partial_retries: u32,
    errors:          AggregateError,
}

enum AttemptOutcome {
    Completed { average_speed: f64 },
    Fallback,
}

enum ChunkOutcome {
    Completed,
    Slow,
}

/// Downloads one file at a time: probes the server, fetches chunks in
/// parallel, assembles them and verifies the result.
///
/// # Example
///
/// ```no_run
/// use chunkfetch::{DownloadTask, ReqwestClient, Settings, TransferOrchestrator};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = TransferOrchestrator::new(ReqwestClient::new()?, Settings::default())?;
/// let task = DownloadTask::new("https://example.com/big.iso", "downloads", "big.iso");
/// let speed = orchestrator.download(&task).await.into_result()?;
/// println!("{speed:.0} B/s");
/// # Ok(())
/// # }
/// ```
pub struct TransferOrchestrator<C: HttpClient> {
    client:   C,
    settings: Settings,
    scratch:  ScratchDir,
    headers:  Vec<(String, String)>,
}

impl<C: HttpClient> TransferOrchestrator<C> {
    /// Fails only if the scratch directory cannot be created.
    pub fn new(client: C, settings: Settings) -> Result<Self> {
        let scratch = match &settings.scratch_dir {
            Some(dir) => ScratchDir::new(dir)?,
            None => ScratchDir::system_default()?,
        };
        let headers = settings.request_headers();
        Ok(Self {
            client,
            settings,
            scratch,
            headers,
        })
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn scratch_dir(&self) -> &ScratchDir { &self.scratch }

    /// Run the whole operation. The completion callback fires exactly once,
    /// with the same value that is returned.
    pub async fn download(&self, task: &DownloadTask) -> Completion {
        let completion = match self.run(task).await {
            Ok(average_speed) => {
                tracing::info!(url = %task.url, average_speed, "download complete");
                Completion::succeeded(average_speed)
            }
            Err(errors) => {
                tracing::warn!(url = %task.url, errors = errors.len(), "download failed");
                Completion::failed(errors)
            }
        };
        if let Some(callback) = &self.settings.on_complete {
            callback(&completion);
        }
        completion
    }

    async fn run(&self, task: &DownloadTask) -> std::result::Result<f64, AggregateError> {
        let mut op = OperationState::default();

        for attempt in 0..self.settings.attempts() {
            if attempt > 0 {
                let delay = self.settings.backoff(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
            }

            tracing::info!(url = %task.url, attempt, "starting attempt");
            match self.attempt(task, attempt, &mut op).await {
                Ok(AttemptOutcome::Completed { average_speed }) => return Ok(average_speed),
                Ok(AttemptOutcome::Fallback) => {
                    tracing::info!(url = %task.url, "switching to single-stream download");
                    return SingleStreamFallback::new(&self.client, &self.settings, &self.scratch)
                        .download(task)
                        .await
                        .map_err(|fallback_errors| {
                            op.errors.extend(fallback_errors.into_errors());
                            op.errors
                        });
                }
                Err(e) => {
                    tracing::warn!(url = %task.url, attempt, error = %e, "attempt failed");
                    let retryable = e.is_retryable();
                    op.errors.push(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(op.errors)
    }

    async fn attempt(&self, task: &DownloadTask, attempt: u32, op: &mut OperationState) -> Result<AttemptOutcome> {
        let reporter = ProgressReporter::new(&self.settings, attempt);

        let info = match op.url_info {
            Some(info) => info,
            None => {
                reporter.phase(FetchPhase::Probing);
                match tokio::time::timeout(self.settings.probe_timeout, self.probe(task)).await {
                    Ok(info) => {
                        let info = info?;
                        op.url_info = Some(info);
                        info
                    }
                    Err(_) => {
                        op.partial_retries += 1;
                        tracing::warn!(url = %task.url, partial_retries = op.partial_retries, "probe timed out");
                        if self.settings.retry_count == 0 || op.partial_retries > self.settings.retry_count / 2 {
                            return Ok(AttemptOutcome::Fallback);
                        }
                        return Err(FetchError::ProbeTimeout(self.settings.probe_timeout));
                    }
                }
            }
        };

        let Some(file_length) = info
            .file_length
            .filter(|_| info.allows_chunking(self.settings.min_parallel_size))
        else {
            tracing::debug!(
                url = %task.url,
                length = ?info.file_length,
                partial = info.supports_partial,
                "chunked transfer not viable"
            );
            return Ok(AttemptOutcome::Fallback);
        };
        reporter.set_total(Some(file_length));

        let registry = ChunkRegistry::new(
            self.scratch.clone(),
            task.file_name.as_str(),
            self.settings.effective_parallelism(),
            self.settings.min_chunk_size,
            self.settings.chunk_retry_limit,
        )
        .slow_check_interval(self.settings.slow_check_interval);
        registry.initialize_chunks(registry.partition(file_length));

        let started = Instant::now();
        let result = self
            .transfer(task, attempt, file_length, &registry, &reporter)
            .await;
        registry.clear();

        match result {
            Ok(()) => {
                let elapsed = started.elapsed().as_secs_f64();
                reporter.phase(FetchPhase::Completed);
                Ok(AttemptOutcome::Completed {
                    average_speed: if elapsed > 0.0 { file_length as f64 / elapsed } else { 0.0 },
                })
            }
            Err(e) => {
                op.url_info = None;
                Err(e)
            }
        }
    }

    /// Length query plus a 1-byte range GET.
    async fn probe(&self, task: &DownloadTask) -> Result<UrlInfo> {
        let head_length = match self.client.head(&task.url, &self.headers).await {
            Ok(len) => len,
            Err(e) => {
                tracing::debug!(url = %task.url, error = %e, "length query failed");
                None
            }
        };

        let response = self
            .client
            .get(&task.url, Some((0, 0)), &self.headers)
            .await
            .map_err(FetchError::network)?;
        match response.status {
            404 => return Err(FetchError::NotFound(task.url.clone())),
            200..=299 => {}
            status => {
                return Err(FetchError::HttpStatus {
                    status,
                    url: task.url.clone(),
                });
            }
        }

        let info = evaluate_probe(
            head_length,
            &ProbeResponse {
                status:         response.status,
                content_length: response.content_length,
                accept_ranges:  response.accept_ranges,
                content_range:  response.content_range,
            },
            task.size,
        );
        tracing::debug!(
            url = %task.url,
            length = ?info.file_length,
            partial = info.supports_partial,
            "probed server"
        );
        Ok(info)
    }

    /// Fetch, assemble and verify within the attempt deadline.
    async fn transfer(
        &self,
        task: &DownloadTask,
        attempt: u32,
        file_length: u64,
        registry: &ChunkRegistry,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        let limit = self.settings.attempt_timeout(attempt);
        reporter.phase(FetchPhase::Downloading);
        tokio::time::timeout(limit, self.run_pipeline(task, registry, reporter))
            .await
            .map_err(|_| FetchError::Timeout(limit))??;
        tracing::debug!(
            url = %task.url,
            bytes = registry.total_downloaded_bytes(),
            chunks = registry.completed_count(),
            "chunk queue drained"
        );

        if !registry.all_chunks_completed() {
            return Err(FetchError::Incomplete {
                completed: registry.completed_count(),
                total:     registry.state_count(),
            });
        }

        reporter.phase(FetchPhase::Assembling);
        let destination = task.destination();
        let checksum = task.checksum.as_ref().filter(|_| self.settings.verify_checksum);
        let chunks = registry.completed_chunks_in_order();
        let digest = match assemble(&chunks, file_length, &destination, checksum.map(|c| c.algorithm())).await {
            Ok(digest) => digest,
            Err(e) => {
                remove_destination(&destination);
                return Err(e);
            }
        };

        if let (Some(checksum), Some(digest)) = (checksum, digest) {
            reporter.phase(FetchPhase::Verifying);
            if let Err(e) = checksum.verify(&digest) {
                tracing::warn!(url = %task.url, "checksum mismatch after assembly");
                remove_destination(&destination);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Run `parallelism` workers over the registry until it drains.
    async fn run_pipeline(&self, task: &DownloadTask, registry: &ChunkRegistry, reporter: &ProgressReporter) -> Result<()> {
        let abandoned = Mutex::new(None);
        let workers = (0..self.settings.effective_parallelism())
            .map(|worker| self.worker(worker, task, registry, reporter, &abandoned));
        join_all(workers).await;

        match abandoned.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn worker(
        &self,
        worker: usize,
        task: &DownloadTask,
        registry: &ChunkRegistry,
        reporter: &ProgressReporter,
        abandoned: &Mutex<Option<FetchError>>,
    ) {
        loop {
            let Some((range, state)) = registry.try_get_next_chunk() else {
                if registry.is_drained() {
                    break;
                }
                registry.wait_for_work().await;
                continue;
            };

            tracing::debug!(worker, range = %range, generation = range.generation, "fetching chunk");
            match self.fetch_chunk(task, &range, &state, reporter).await {
                Ok(ChunkOutcome::Completed) => {
                    registry.complete_chunk(&state);
                }
                Ok(ChunkOutcome::Slow) => registry.handle_slow_chunk(&range, &state),
                Err(e) => {
                    tracing::warn!(worker, range = %range, error = %e, "chunk failed");
                    let corrupt = matches!(e, FetchError::SizeMismatch { .. } | FetchError::Io(_));
                    if corrupt {
                        state.discard();
                    }
                    let can_split = !corrupt && self.settings.can_split(range.generation);
                    if !registry.handle_chunk_failure(&range, &state, can_split) {
                        let mut first = abandoned.lock();
                        if first.is_none() {
                            *first = Some(FetchError::Abandoned {
                                start:    range.start,
                                end:      range.end,
                                failures: registry.failure_count(&range),
                                reason:   e.to_string(),
                            });
                        }
                    }
                }
            }
            registry.release_active();
        }
    }

    /// Stream one range into its temp file.
    ///
    /// The file is flushed before returning, whatever the outcome, so the
    /// state's byte count always matches what is on disk.
    async fn fetch_chunk(
        &self,
        task: &DownloadTask,
        range: &ByteRange,
        state: &Arc<ChunkState>,
        reporter: &ProgressReporter,
    ) -> Result<ChunkOutcome> {
        let budget = self.settings.chunk_deadline(range.generation);
        let deadline = budget.map(|d| tokio::time::Instant::now() + d);

        let response = within(deadline, budget, self.client.get(&task.url, Some(range.key()), &self.headers))
            .await?
            .map_err(FetchError::network)?;
        match response.status {
            PARTIAL_CONTENT => {}
            404 => return Err(FetchError::NotFound(task.url.clone())),
            status => {
                return Err(FetchError::HttpStatus {
                    status,
                    url: task.url.clone(),
                });
            }
        }
        if let Some(len) = response.content_length
            && len != range.len()
        {
            return Err(FetchError::SizeMismatch {
                start:    range.start,
                end:      range.end,
                expected: range.len(),
                actual:   len,
            });
        }

        let mut file = state.create_file().await?;
        let result = self
            .stream_into(&mut file, response.body, range, state, reporter, deadline, budget)
            .await;
        let flushed = file.flush().await;
        let outcome = result?;
        flushed?;
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_into(
        &self,
        file: &mut File,
        mut body: BoxStream<'static, std::result::Result<bytes::Bytes, C::Error>>,
        range: &ByteRange,
        state: &ChunkState,
        reporter: &ProgressReporter,
        deadline: Option<tokio::time::Instant>,
        budget: Option<Duration>,
    ) -> Result<ChunkOutcome> {
        while let Some(item) = within(deadline, budget, body.next()).await? {
            let bytes = item.map_err(FetchError::network)?;
            let received = state.bytes_downloaded() + bytes.len() as u64;
            if received > range.len() {
                return Err(FetchError::SizeMismatch {
                    start:    range.start,
                    end:      range.end,
                    expected: range.len(),
                    actual:   received,
                });
            }

            file.write_all(&bytes).await?;
            state.update_progress(bytes.len() as u64);
            reporter.record(bytes.len() as u64);

            if state.slow_retries() < MAX_SLOW_RETRIES && !state.is_completed() && state.is_too_slow() {
                tracing::debug!(range = %range, "chunk below expected speed");
                return Ok(ChunkOutcome::Slow);
            }
        }

        if !state.is_completed() {
            return Err(FetchError::SizeMismatch {
                start:    range.start,
                end:      range.end,
                expected: range.len(),
                actual:   state.bytes_downloaded(),
            });
        }
        Ok(ChunkOutcome::Completed)
    }
}

/// Await `fut`, bounded by `deadline` when there is one.
async fn within<F: Future>(
    deadline: Option<tokio::time::Instant>,
    budget: Option<Duration>,
    fut: F,
) -> Result<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| FetchError::Timeout(budget.unwrap_or_default())),
        None => Ok(fut.await),
    }
}

fn remove_destination(path: &std::path::Path) {
    if let Err(e) = chunkfetch_fs::remove_quietly(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove destination");
    }
}
