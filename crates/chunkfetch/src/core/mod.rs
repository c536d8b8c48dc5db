//! Pure transformations: range arithmetic, throughput estimation, backoff and
//! probe evaluation. Nothing here performs I/O.

mod backoff;
pub mod partition;
pub mod probe;
pub mod speed;

pub use backoff::backoff_delay;
pub use partition::{downloaded_span, partition, remaining_span, split_range};
pub use probe::{PARTIAL_CONTENT, ProbeResponse, evaluate_probe, parse_content_range_total};
pub use speed::SpeedSampler;
