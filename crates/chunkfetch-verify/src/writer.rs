use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::{Checksum, Hasher, Result};

/// Async writer that hashes every byte it hands to the inner writer.
///
/// Only bytes the inner writer accepted are hashed, so short writes keep the
/// digest consistent with what actually reached the sink.
pub struct HashingWriter<W, H> {
    inner:   W,
    hasher:  H,
    written: u64,
}

impl<W, H> HashingWriter<W, H> {
    pub fn new(inner: W, hasher: H) -> Self {
        Self {
            inner,
            hasher,
            written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 { self.written }

    pub fn get_ref(&self) -> &W { &self.inner }
}

impl<W, H: Hasher> HashingWriter<W, H> {
    /// Split into the inner writer and the finished digest.
    pub fn finalize(self) -> (W, Vec<u8>) { (self.inner, self.hasher.finalize()) }

    /// Finalize and compare against `expected`.
    pub fn finish(self, expected: &Checksum) -> Result<W> {
        let (inner, actual) = self.finalize();
        expected.verify(&actual)?;
        Ok(inner)
    }
}

impl<W, H> AsyncWrite for HashingWriter<W, H>
where
    W: AsyncWrite + Unpin,
    H: Hasher + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AnyHasher, HashAlgorithm, Sha256Hasher, VerificationError};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn hashes_what_it_writes() {
        let mut writer = HashingWriter::new(Vec::new(), Sha256Hasher::new());
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.bytes_written(), 11);

        let (sink, digest) = writer.finalize();
        assert_eq!(sink, b"hello world");
        assert_eq!(
            hex::encode(digest),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn finish_reports_mismatch() {
        let expected =
            Checksum::new(HashAlgorithm::Sha1, HashAlgorithm::Sha1.digest(b"other")).unwrap();
        let mut writer = HashingWriter::new(Vec::new(), AnyHasher::new(HashAlgorithm::Sha1));
        writer.write_all(b"payload").await.unwrap();

        let result = writer.finish(&expected);
        assert!(matches!(result, Err(VerificationError::Mismatch { .. })));
    }
}
