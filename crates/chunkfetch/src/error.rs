//! Error types for chunkfetch.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("bytes {start}-{end}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        start:    u64,
        end:      u64,
        expected: u64,
        actual:   u64,
    },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("bytes {start}-{end} abandoned after {failures} failures: {reason}")]
    Abandoned {
        start:    u64,
        end:      u64,
        failures: u32,
        reason:   String,
    },

    #[error("{completed} of {total} chunks completed")]
    Incomplete { completed: usize, total: usize },

    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fs(#[from] chunkfetch_fs::Error),

    #[error(transparent)]
    Verify(chunkfetch_verify::VerificationError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// `false` for failures another attempt cannot fix.
    pub fn is_retryable(&self) -> bool { !matches!(self, Self::NotFound(_) | Self::Config(_)) }

    pub(crate) fn network(e: impl std::error::Error) -> Self { Self::Network(e.to_string()) }
}

impl From<chunkfetch_verify::VerificationError> for FetchError {
    fn from(e: chunkfetch_verify::VerificationError) -> Self {
        match e {
            chunkfetch_verify::VerificationError::Mismatch { expected, actual } => {
                Self::ChecksumMismatch {
                    expected: hex::encode(expected),
                    actual:   hex::encode(actual),
                }
            }
            other => Self::Verify(other),
        }
    }
}

/// Every error observed across the attempts of one download, oldest first.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<FetchError>,
}

impl AggregateError {
    pub fn new(errors: Vec<FetchError>) -> Self { Self { errors } }

    pub fn push(&mut self, error: FetchError) { self.errors.push(error); }

    pub fn errors(&self) -> &[FetchError] { &self.errors }

    pub fn into_errors(self) -> Vec<FetchError> { self.errors }

    pub fn is_empty(&self) -> bool { self.errors.is_empty() }

    pub fn len(&self) -> usize { self.errors.len() }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download failed with {} error(s)", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "\n  {}: {e}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.last().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl Extend<FetchError> for AggregateError {
    fn extend<I: IntoIterator<Item = FetchError>>(&mut self, iter: I) { self.errors.extend(iter); }
}

pub type Result<T> = std::result::Result<T, FetchError>;
