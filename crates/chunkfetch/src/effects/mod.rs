//! I/O: the HTTP client seam, chunk files, the registry shared by workers,
//! assembly and the two download paths.

pub mod assemble;
pub mod chunk;
pub mod fallback;
pub mod http;
pub mod orchestrator;
pub mod progress;
pub mod registry;
mod sink;

pub use chunk::ChunkState;
pub use fallback::SingleStreamFallback;
pub use http::{BoxStream, HttpClient, HttpResponse};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use orchestrator::TransferOrchestrator;
pub use progress::ProgressReporter;
pub use registry::ChunkRegistry;
