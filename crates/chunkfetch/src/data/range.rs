use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Inclusive byte range of the remote file plus the temp file its bytes land in.
///
/// Identity (equality, hashing, ordering) is the `(start, end)` pair only, so a
/// range keeps its identity when its temp file is regenerated.
#[derive(Debug, Clone)]
pub struct ByteRange {
    pub start:      u64,
    pub end:        u64,
    /// Number of splits in this range's lineage.
    pub generation: u32,
    temp_path:      PathBuf,
}

impl ByteRange {
    pub fn new(start: u64, end: u64, generation: u32, temp_path: impl Into<PathBuf>) -> Self {
        debug_assert!(start <= end, "range start {start} past end {end}");
        Self {
            start,
            end,
            generation,
            temp_path: temp_path.into(),
        }
    }

    pub fn len(&self) -> u64 { self.end - self.start + 1 }

    /// Inclusive ranges always hold at least one byte.
    pub fn is_empty(&self) -> bool { false }

    pub fn key(&self) -> (u64, u64) { (self.start, self.end) }

    pub fn temp_path(&self) -> &Path { &self.temp_path }

    /// Same offsets, different backing file.
    pub fn with_temp_path(&self, temp_path: impl Into<PathBuf>) -> Self {
        Self {
            temp_path: temp_path.into(),
            ..self.clone()
        }
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String { format!("bytes={}-{}", self.start, self.end) }
}

impl PartialEq for ByteRange {
    fn eq(&self, other: &Self) -> bool { self.key() == other.key() }
}

impl Eq for ByteRange {}

impl Hash for ByteRange {
    fn hash<H: Hasher>(&self, state: &mut H) { self.key().hash(state); }
}

impl PartialOrd for ByteRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ByteRange {
    fn cmp(&self, other: &Self) -> Ordering { self.key().cmp(&other.key()) }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}-{}", self.start, self.end) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_temp_path() {
        let a = ByteRange::new(0, 99, 0, "/tmp/a.part");
        let b = a.with_temp_path("/tmp/b.part");
        assert_eq!(a, b);
        assert_ne!(a.temp_path(), b.temp_path());

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn orders_by_start_then_end() {
        let mut ranges = vec![
            ByteRange::new(10, 20, 0, "c"),
            ByteRange::new(5, 9, 0, "b"),
            ByteRange::new(5, 5, 1, "a"),
        ];
        ranges.sort();
        let keys: Vec<_> = ranges.iter().map(ByteRange::key).collect();
        assert_eq!(keys, vec![(5, 5), (5, 9), (10, 20)]);
    }

    #[test]
    fn length_and_header() {
        let range = ByteRange::new(100, 199, 2, "x");
        assert_eq!(range.len(), 100);
        assert_eq!(range.header_value(), "bytes=100-199");
        assert_eq!(range.to_string(), "100-199");
        assert_eq!(ByteRange::new(7, 7, 0, "y").len(), 1);
    }
}
