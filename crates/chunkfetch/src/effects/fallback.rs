use std::path::Path;
use std::time::Instant;

use chunkfetch_fs::ScratchDir;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::http::HttpClient;
use super::progress::ProgressReporter;
use super::sink::Sink;
use crate::data::{DownloadTask, FetchPhase, Settings};
use crate::error::{AggregateError, FetchError, Result};

/// Sequential whole-file download for servers or files where chunking does
/// not pay off.
pub struct SingleStreamFallback<'a, C: HttpClient> {
    client:   &'a C,
    settings: &'a Settings,
    scratch:  &'a ScratchDir,
}

impl<'a, C: HttpClient> SingleStreamFallback<'a, C> {
    pub fn new(client: &'a C, settings: &'a Settings, scratch: &'a ScratchDir) -> Self {
        Self {
            client,
            settings,
            scratch,
        }
    }

    /// Download `task` with its own retry budget.
    ///
    /// Returns the average speed of the successful attempt, or every error
    /// seen. A 404 ends the loop at once.
    pub async fn download(&self, task: &DownloadTask) -> std::result::Result<f64, AggregateError> {
        let destination = task.destination();
        let mut errors = AggregateError::default();

        for attempt in 0..self.settings.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.settings.backoff(attempt - 1)).await;
            }

            let target = if self.settings.fallback_direct_write {
                destination.clone()
            } else {
                self.scratch.unique_path(&task.file_name, "download")
            };
            let reporter = ProgressReporter::new(self.settings, attempt);
            let limit = self.settings.attempt_timeout(attempt);
            let started = Instant::now();

            tracing::info!(url = %task.url, attempt, "single-stream download");
            let result = tokio::time::timeout(limit, self.attempt(task, &target, &destination, &reporter))
                .await
                .unwrap_or(Err(FetchError::Timeout(limit)));

            match result {
                Ok(bytes) => {
                    reporter.phase(FetchPhase::Completed);
                    let elapsed = started.elapsed().as_secs_f64();
                    return Ok(if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 });
                }
                Err(e) => {
                    tracing::warn!(url = %task.url, attempt, error = %e, "single-stream attempt failed");
                    if let Err(cleanup) = chunkfetch_fs::remove_quietly(&target) {
                        tracing::warn!(error = %cleanup, "failed to remove partial download");
                    }
                    let retryable = e.is_retryable();
                    errors.push(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(errors)
    }

    async fn attempt(
        &self,
        task: &DownloadTask,
        target: &Path,
        destination: &Path,
        reporter: &ProgressReporter,
    ) -> Result<u64> {
        let headers = self.settings.request_headers();
        let response = self
            .client
            .get(&task.url, None, &headers)
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

        reporter.set_total(response.content_length.or(task.size));
        reporter.phase(FetchPhase::Downloading);

        let checksum = task.checksum.as_ref().filter(|_| self.settings.verify_checksum);
        let mut sink = Sink::create(target, checksum.map(|c| c.algorithm())).await?;
        let mut written = 0u64;
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FetchError::network)?;
            sink.writer().write_all(&chunk).await?;
            written += chunk.len() as u64;
            reporter.record(chunk.len() as u64);
        }
        let digest = sink.finish().await?;

        if let Some(expected) = response.content_length
            && expected != written
        {
            return Err(FetchError::SizeMismatch {
                start: 0,
                end: expected.saturating_sub(1),
                expected,
                actual: written,
            });
        }

        if let (Some(checksum), Some(digest)) = (checksum, digest) {
            reporter.phase(FetchPhase::Verifying);
            checksum.verify(&digest)?;
        }

        if target != destination {
            chunkfetch_fs::promote(target, destination)?;
        }
        Ok(written)
    }
}
