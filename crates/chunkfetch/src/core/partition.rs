//! Range arithmetic.
//!
//! Neighbouring spans share one boundary byte: span `i` ends where span `i + 1`
//! starts. Assembly skips the first byte of every chunk after the first, so the
//! assembled output is exactly the remote file.

/// Split the inclusive span `[start, end]` into at most `parts` spans.
///
/// Every span has `len / parts` steps; the last one runs to `end` and absorbs
/// the remainder. `parts` is clamped to `[1, len]`.
pub fn split_range(start: u64, end: u64, parts: usize) -> Vec<(u64, u64)> {
    debug_assert!(start <= end);
    let len = end - start + 1;
    let parts = (parts.max(1) as u64).min(len);
    let step = len / parts;

    (0..parts)
        .map(|i| {
            let from = start + i * step;
            let to = if i + 1 == parts { end } else { from + step };
            (from, to)
        })
        .collect()
}

/// Initial partition of a file of `file_length` bytes.
///
/// An empty file has no spans.
pub fn partition(file_length: u64, parts: usize) -> Vec<(u64, u64)> {
    if file_length == 0 {
        return Vec::new();
    }
    split_range(0, file_length - 1, parts)
}

/// Span holding the first `downloaded` bytes of `[start, end]`.
pub fn downloaded_span(start: u64, end: u64, downloaded: u64) -> Option<(u64, u64)> {
    let len = end - start + 1;
    (downloaded > 0).then(|| (start, start + downloaded.min(len) - 1))
}

/// Span still to fetch after `downloaded` bytes of `[start, end]`.
///
/// Starts on the last downloaded byte so it overlaps the downloaded prefix by
/// one byte, like any other neighbouring pair.
pub fn remaining_span(start: u64, end: u64, downloaded: u64) -> (u64, u64) {
    match downloaded_span(start, end, downloaded) {
        Some((_, last)) => (last, end),
        None => (start, end),
    }
}

/// Bytes contributed to the output by spans in sorted order.
pub fn assembled_len(spans: &[(u64, u64)]) -> u64 {
    spans
        .iter()
        .enumerate()
        .map(|(i, (s, e))| e - s + 1 - u64::from(i > 0))
        .sum()
}
