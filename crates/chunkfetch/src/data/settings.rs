use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::progress::{Completion, Progress};
use crate::error::{FetchError, Result};

/// Callback receiving throttled progress updates.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Callback receiving the single completion notice of a download.
pub type CompletionCallback = Arc<dyn Fn(&Completion) + Send + Sync>;

/// Tuning and policy for a download.
///
/// Durations are (de)serialized as integer milliseconds under `*_ms` keys, so a
/// TOML file looks like:
///
/// ```toml
/// retry_count = 5
/// parallelism = 16
/// timeout_ms = 120000
/// ```
///
/// # Examples
///
/// ```
/// use chunkfetch::Settings;
/// use std::time::Duration;
///
/// let settings = Settings::default()
///     .parallelism(4)
///     .retry_count(5)
///     .timeout(Duration::from_secs(30))
///     .authorization("Bearer token");
/// assert_eq!(settings.attempts(), 5);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whole-operation attempts. `0` disables retrying: one attempt is made.
    ///
    /// Default: 3
    pub retry_count: u32,

    /// Base deadline of one whole-operation attempt; attempt `i` gets `timeout * (i + 1)`.
    ///
    /// Default: 60s
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    /// Number of concurrent chunk fetches, and number of initial chunks.
    ///
    /// Default: 8
    pub parallelism: usize,

    /// Verify the task's checksum after assembly, when one is supplied.
    ///
    /// Default: true
    pub verify_checksum: bool,

    /// Invoke the progress callback at all.
    ///
    /// Default: true
    pub emit_progress: bool,

    /// Value of the `Authorization` header sent with every request.
    pub authorization: Option<String>,

    /// Value of the `Host` header sent with every request.
    pub host_override: Option<String>,

    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,

    /// Base of the exponential backoff between attempts.
    ///
    /// Default: 500ms
    #[serde(rename = "retry_backoff_ms", with = "millis")]
    pub retry_backoff: Duration,

    /// Upper bound of the backoff between attempts.
    ///
    /// Default: 10s
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,

    /// Deadline of the capability probe.
    ///
    /// Default: 5s
    #[serde(rename = "probe_timeout_ms", with = "millis")]
    pub probe_timeout: Duration,

    /// Per-chunk deadline for generation 0; generation `g` gets `chunk_timeout * (g + 1)`.
    ///
    /// Default: 15s
    #[serde(rename = "chunk_timeout_ms", with = "millis")]
    pub chunk_timeout: Duration,

    /// Split generations that still get a per-chunk deadline and may be split again.
    ///
    /// Default: 3
    pub max_split_generations: u32,

    /// Failures tolerated per range before it is abandoned. `0` means unlimited.
    ///
    /// Default: 5
    pub chunk_retry_limit: u32,

    /// Remaining bytes a failed chunk must exceed to be split.
    ///
    /// Default: 8 KiB
    pub min_chunk_size: u64,

    /// Files smaller than this are fetched with a single stream.
    ///
    /// Default: 1 MiB
    pub min_parallel_size: u64,

    /// Spacing of the per-chunk slow-speed check.
    ///
    /// Default: 3s
    #[serde(rename = "slow_check_interval_ms", with = "millis")]
    pub slow_check_interval: Duration,

    /// Minimum spacing of progress events.
    ///
    /// Default: 200ms
    #[serde(rename = "progress_interval_ms", with = "millis")]
    pub progress_interval: Duration,

    /// Where chunk temp files live. Default: `<system temp>/chunkfetch`.
    pub scratch_dir: Option<PathBuf>,

    /// Single-stream downloads write the destination directly instead of
    /// promoting a temp file.
    ///
    /// Default: false
    pub fallback_direct_write: bool,

    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,

    #[serde(skip)]
    pub on_complete: Option<CompletionCallback>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("retry_count", &self.retry_count)
            .field("timeout", &self.timeout)
            .field("parallelism", &self.parallelism)
            .field("verify_checksum", &self.verify_checksum)
            .field("emit_progress", &self.emit_progress)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("host_override", &self.host_override)
            .field("headers", &self.headers)
            .field("retry_backoff", &self.retry_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("probe_timeout", &self.probe_timeout)
            .field("chunk_timeout", &self.chunk_timeout)
            .field("max_split_generations", &self.max_split_generations)
            .field("chunk_retry_limit", &self.chunk_retry_limit)
            .field("min_chunk_size", &self.min_chunk_size)
            .field("min_parallel_size", &self.min_parallel_size)
            .field("slow_check_interval", &self.slow_check_interval)
            .field("progress_interval", &self.progress_interval)
            .field("scratch_dir", &self.scratch_dir)
            .field("fallback_direct_write", &self.fallback_direct_write)
            .field("on_progress", &"{ ... }")
            .field("on_complete", &"{ ... }")
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            timeout: Duration::from_secs(60),
            parallelism: 8,
            verify_checksum: true,
            emit_progress: true,
            authorization: None,
            host_override: None,
            headers: Vec::new(),
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            chunk_timeout: Duration::from_secs(15),
            max_split_generations: 3,
            chunk_retry_limit: 5,
            min_chunk_size: 8 * 1024,
            min_parallel_size: 1024 * 1024,
            slow_check_interval: Duration::from_secs(3),
            progress_interval: Duration::from_millis(200),
            scratch_dir: None,
            fallback_direct_write: false,
            on_progress: None,
            on_complete: None,
        }
    }
}

impl Settings {
    /// Parse settings from TOML; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| FetchError::Config(e.to_string()))
    }

    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    #[must_use]
    pub fn emit_progress(mut self, emit: bool) -> Self {
        self.emit_progress = emit;
        self
    }

    #[must_use]
    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    #[must_use]
    pub fn host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff = base;
        self.max_backoff = max;
        self
    }

    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_split_generations(mut self, generations: u32) -> Self {
        self.max_split_generations = generations;
        self
    }

    #[must_use]
    pub fn chunk_retry_limit(mut self, limit: u32) -> Self {
        self.chunk_retry_limit = limit;
        self
    }

    #[must_use]
    pub fn min_chunk_size(mut self, bytes: u64) -> Self {
        self.min_chunk_size = bytes;
        self
    }

    #[must_use]
    pub fn min_parallel_size(mut self, bytes: u64) -> Self {
        self.min_parallel_size = bytes;
        self
    }

    #[must_use]
    pub fn slow_check_interval(mut self, interval: Duration) -> Self {
        self.slow_check_interval = interval;
        self
    }

    #[must_use]
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    #[must_use]
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn fallback_direct_write(mut self, direct: bool) -> Self {
        self.fallback_direct_write = direct;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Total whole-operation attempts.
    pub fn attempts(&self) -> u32 { self.retry_count.max(1) }

    pub fn effective_parallelism(&self) -> usize { self.parallelism.max(1) }

    /// Deadline of attempt `attempt` (0-based).
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        self.timeout.saturating_mul(attempt.saturating_add(1))
    }

    /// Per-chunk deadline for a range of `generation`, or `None` once the
    /// split budget is spent and chunks share the attempt deadline.
    pub fn chunk_deadline(&self, generation: u32) -> Option<Duration> {
        (generation < self.max_split_generations)
            .then(|| self.chunk_timeout.saturating_mul(generation.saturating_add(1)))
    }

    /// A range of `generation` may still be split on failure.
    pub fn can_split(&self, generation: u32) -> bool { generation < self.max_split_generations }

    /// Delay before retry number `retry` (0-based), capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        crate::core::backoff_delay(retry, self.retry_backoff, self.max_backoff)
    }

    /// Headers for every request: extras, then authorization and host override.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if let Some(auth) = &self.authorization {
            headers.push(("Authorization".to_string(), auth.clone()));
        }
        if let Some(host) = &self.host_override {
            headers.push(("Host".to_string(), host.clone()));
        }
        headers
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
