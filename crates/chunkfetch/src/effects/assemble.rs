use std::path::Path;
use std::sync::Arc;

use chunkfetch_verify::HashAlgorithm;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use super::chunk::ChunkState;
use super::sink::Sink;
use crate::error::{FetchError, Result};

/// Merge completed chunks into `destination`.
///
/// Chunks are sorted by offset first, so input order does not matter. Every
/// chunk after the first starts on its predecessor's last byte, which is
/// skipped. Returns the digest when `algorithm` is set.
pub async fn assemble(
    chunks: &[Arc<ChunkState>],
    file_length: u64,
    destination: &Path,
    algorithm: Option<HashAlgorithm>,
) -> Result<Option<Vec<u8>>> {
    let mut chunks: Vec<_> = chunks.iter().collect();
    chunks.sort_by_key(|c| c.range().key());
    check_coverage(&chunks, file_length)?;

    let mut sink = Sink::create(destination, algorithm).await?;
    for (i, chunk) in chunks.iter().enumerate() {
        let range = chunk.range();
        let mut file = File::open(range.temp_path()).await?;

        let on_disk = file.metadata().await?.len();
        if on_disk < range.len() {
            return Err(FetchError::SizeMismatch {
                start:    range.start,
                end:      range.end,
                expected: range.len(),
                actual:   on_disk,
            });
        }

        let skip = u64::from(i > 0);
        if skip > 0 {
            file.seek(SeekFrom::Start(skip)).await?;
        }
        let mut body = file.take(range.len() - skip);
        tokio::io::copy(&mut body, sink.writer()).await?;
    }

    let digest = sink.finish().await?;
    tracing::debug!(
        destination = %destination.display(),
        chunks = chunks.len(),
        bytes = file_length,
        "assembled chunks"
    );
    Ok(digest)
}

/// First chunk starts at 0, each next one on its predecessor's end, last one at
/// the final byte.
fn check_coverage(chunks: &[&Arc<ChunkState>], file_length: u64) -> Result<()> {
    let incomplete = || FetchError::Incomplete {
        completed: chunks.len(),
        total:     chunks.len() + 1,
    };

    let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
        return Err(incomplete());
    };
    if first.range().start != 0 || last.range().end + 1 != file_length {
        return Err(incomplete());
    }
    if chunks
        .windows(2)
        .any(|pair| pair[0].range().end != pair[1].range().start)
    {
        return Err(incomplete());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chunkfetch_verify::Checksum;

    use super::*;
    use crate::core::partition;
    use crate::data::ByteRange;

    fn source(len: usize) -> Vec<u8> { (0..len).map(|i| (i * 31 % 251) as u8).collect() }

    fn write_chunks(dir: &Path, data: &[u8], spans: &[(u64, u64)]) -> Vec<Arc<ChunkState>> {
        spans
            .iter()
            .map(|&(start, end)| {
                let range = ByteRange::new(start, end, 0, dir.join(format!("{start}-{end}.part")));
                std::fs::write(range.temp_path(), &data[start as usize..=end as usize]).unwrap();
                let state = ChunkState::new(range, 0.0, 0);
                state.update_progress(end - start + 1);
                Arc::new(state)
            })
            .collect()
    }

    #[tokio::test]
    async fn output_is_independent_of_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let data = source(10_000);
        let mut chunks = write_chunks(dir.path(), &data, &partition(10_000, 7));
        chunks.reverse();
        chunks.swap(1, 4);

        let dest = dir.path().join("out").join("file.bin");
        let digest = assemble(&chunks, 10_000, &dest, Some(HashAlgorithm::Sha256))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data);
        Checksum::new(HashAlgorithm::Sha256, HashAlgorithm::Sha256.digest(&data))
            .unwrap()
            .verify(&digest)
            .unwrap();
    }

    #[tokio::test]
    async fn split_chunks_assemble_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let data = source(1000);
        // prefix of a split chunk, then the split tail
        let spans = [(0, 299), (299, 500), (500, 700), (700, 999)];
        let chunks = write_chunks(dir.path(), &data, &spans);

        let dest = dir.path().join("file.bin");
        assert!(assemble(&chunks, 1000, &dest, None).await.unwrap().is_none());
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn gap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = source(1000);
        let chunks = write_chunks(dir.path(), &data, &[(0, 400), (500, 999)]);

        let err = assemble(&chunks, 1000, &dir.path().join("f"), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Incomplete { .. }));
    }

    #[tokio::test]
    async fn short_chunk_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = source(100);
        let chunks = write_chunks(dir.path(), &data, &[(0, 99)]);
        std::fs::write(chunks[0].range().temp_path(), &data[..50]).unwrap();

        let err = assemble(&chunks, 100, &dir.path().join("f"), None).await.unwrap_err();
        assert!(matches!(err, FetchError::SizeMismatch { actual: 50, .. }));
    }
}
