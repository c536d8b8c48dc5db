//! Scratch-file ownership for chunked downloads.
//!
//! Every chunk of an in-flight download lives in its own file under a
//! [`ScratchDir`]. Finished artifacts are moved into place with [`promote`].

mod error;
mod scratch;

pub use error::{Error, Result};
pub use scratch::{ScratchDir, promote, remove_quietly};
