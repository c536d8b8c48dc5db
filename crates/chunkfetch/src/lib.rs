//! Adaptive parallel chunked HTTP downloads.
//!
//! One [`TransferOrchestrator`] fetches one file per call: it probes the
//! server for range support, splits the file into byte ranges fetched by a
//! bounded pool of workers, re-queues or splits chunks that fail or stall,
//! then assembles and verifies the result. Servers without range support
//! and small files go through [`SingleStreamFallback`].
//!
//! # Architecture
//!
//! - [`data`] - descriptors, settings and callback payloads
//! - [`core`] - pure range arithmetic, speed sampling, backoff, probe evaluation
//! - [`effects`] - HTTP, chunk files, the chunk registry and the orchestrator
//!
//! Per-chunk failures never reach the caller. Only exhausting the retry
//! budget does, as an [`AggregateError`] inside the [`Completion`].

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use data::{
    ByteRange, Completion, CompletionCallback, DownloadTask, FetchPhase, Progress,
    ProgressCallback, Settings, UrlInfo,
};
pub use effects::{
    BoxStream, ChunkRegistry, ChunkState, HttpClient, HttpResponse, SingleStreamFallback,
    TransferOrchestrator,
};
#[cfg(feature = "reqwest")]
pub use effects::ReqwestClient;
pub use error::{AggregateError, FetchError, Result};

pub use chunkfetch_verify::{Checksum, HashAlgorithm};
