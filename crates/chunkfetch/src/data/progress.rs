use crate::error::{AggregateError, FetchError};

/// Phase of a download operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Learning the file length and range support.
    Probing,
    /// Chunk or single-stream transfer in flight.
    Downloading,
    /// Merging chunk files into the destination.
    Assembling,
    /// Comparing the computed digest against the expected checksum.
    Verifying,
    Completed,
}

/// Snapshot passed to the progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub phase: FetchPhase,

    /// Current throughput in bytes per second over the sampling window.
    pub speed: f64,

    /// `bytes_received / total_bytes`, clamped to `[0, 1]`; `0` when the
    /// total is unknown.
    pub fraction: f64,

    /// Never above `total_bytes` when the total is known: range overlaps and
    /// refetched bytes are not counted twice.
    pub bytes_received: u64,

    pub total_bytes: Option<u64>,

    /// Whole-operation attempt, 0-based.
    pub attempt: u32,
}

impl Progress {
    pub fn new(phase: FetchPhase, speed: f64, bytes_received: u64, total_bytes: Option<u64>, attempt: u32) -> Self {
        let bytes_received = total_bytes.map_or(bytes_received, |total| bytes_received.min(total));
        let fraction = match total_bytes {
            Some(total) if total > 0 => (bytes_received as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        };
        Self {
            phase,
            speed,
            fraction,
            bytes_received,
            total_bytes,
            attempt,
        }
    }
}

/// Final outcome of [`TransferOrchestrator::download`](crate::TransferOrchestrator::download).
#[derive(Debug)]
pub struct Completion {
    pub success:       bool,
    /// Every error observed across attempts; `None` on success.
    pub error:         Option<AggregateError>,
    /// Average throughput in bytes per second; `-1.0` when not meaningful.
    pub average_speed: f64,
}

impl Completion {
    pub(crate) fn succeeded(average_speed: f64) -> Self {
        Self {
            success: true,
            error: None,
            average_speed,
        }
    }

    pub(crate) fn failed(errors: AggregateError) -> Self {
        Self {
            success:       false,
            error:         Some(errors),
            average_speed: -1.0,
        }
    }

    /// Average speed on success, the aggregated errors otherwise.
    pub fn into_result(self) -> std::result::Result<f64, AggregateError> {
        match (self.success, self.error) {
            (true, _) => Ok(self.average_speed),
            (false, Some(errors)) => Err(errors),
            (false, None) => Err(AggregateError::new(vec![FetchError::Incomplete {
                completed: 0,
                total:     0,
            }])),
        }
    }
}
