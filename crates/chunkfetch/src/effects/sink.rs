use std::io;
use std::path::Path;

use chunkfetch_verify::{AnyHasher, HashAlgorithm, HashingWriter};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Output file, optionally hashed on the way through.
pub enum Sink {
    Plain(BufWriter<File>),
    Hashing(HashingWriter<BufWriter<File>, AnyHasher>),
}

impl Sink {
    /// Create (truncating) `path`, hashing with `algorithm` when given.
    pub async fn create(path: &Path, algorithm: Option<HashAlgorithm>) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = BufWriter::new(File::create(path).await?);
        Ok(match algorithm {
            Some(algorithm) => Self::Hashing(HashingWriter::new(file, AnyHasher::new(algorithm))),
            None => Self::Plain(file),
        })
    }

    pub fn writer(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        match self {
            Self::Plain(w) => w,
            Self::Hashing(w) => w,
        }
    }

    /// Flush everything to disk; returns the digest when hashing.
    pub async fn finish(self) -> io::Result<Option<Vec<u8>>> {
        match self {
            Self::Plain(mut w) => {
                w.flush().await?;
                w.into_inner().sync_all().await?;
                Ok(None)
            }
            Self::Hashing(w) => {
                let (mut inner, digest) = w.finalize();
                inner.flush().await?;
                inner.into_inner().sync_all().await?;
                Ok(Some(digest))
            }
        }
    }
}
