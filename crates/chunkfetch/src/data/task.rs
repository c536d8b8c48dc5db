use std::path::PathBuf;

use chunkfetch_verify::Checksum;

/// Caller-supplied description of one file to download.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url:       String,
    pub directory: PathBuf,
    pub file_name: String,
    /// Expected digest; only checked when [`Settings::verify_checksum`](crate::Settings) is on.
    pub checksum:  Option<Checksum>,
    /// Size known ahead of time, used when the server omits a length.
    pub size:      Option<u64>,
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            url:       url.into(),
            directory: directory.into(),
            file_name: file_name.into(),
            checksum:  None,
            size:      None,
        }
    }

    #[must_use]
    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn destination(&self) -> PathBuf { self.directory.join(&self.file_name) }
}

/// What the capability probe learned about the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlInfo {
    pub file_length:      Option<u64>,
    pub supports_partial: bool,
}

impl UrlInfo {
    /// Partial download is usable and the file is at least `min_size` bytes.
    pub fn allows_chunking(&self, min_size: u64) -> bool {
        self.supports_partial && self.file_length.is_some_and(|len| len > 0 && len >= min_size)
    }
}
