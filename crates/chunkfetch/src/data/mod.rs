//! Plain data: the download descriptor, settings, byte ranges and the values
//! handed to callbacks.

pub mod progress;
pub mod range;
pub mod settings;
pub mod task;

pub use progress::{Completion, FetchPhase, Progress};
pub use range::ByteRange;
pub use settings::{CompletionCallback, ProgressCallback, Settings};
pub use task::{DownloadTask, UrlInfo};
