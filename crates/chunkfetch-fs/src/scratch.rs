use std::path::{Path, PathBuf};

use crate::{Error, Result};

const SCRATCH_DIR_NAME: &str = "chunkfetch";

/// Process-wide directory holding temporary chunk files.
///
/// Paths handed out are unique per call; the directory itself is shared by
/// every download in the process and is never removed by this type.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Open (creating if needed) a scratch directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| Error::Create {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// `<system temp>/chunkfetch`.
    pub fn system_default() -> Result<Self> { Self::new(std::env::temp_dir().join(SCRATCH_DIR_NAME)) }

    pub fn path(&self) -> &Path { &self.root }

    /// Fresh path `<stem>.<uuid>.<suffix>` inside the scratch directory.
    /// Nothing is created on disk.
    pub fn unique_path(&self, stem: &str, suffix: &str) -> PathBuf {
        let stem = sanitize(stem);
        self.root
            .join(format!("{stem}.{}.{suffix}", uuid::Uuid::new_v4().simple()))
    }
}

fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "download".to_string() } else { cleaned }
}

/// Remove a file, treating "already gone" as success.
pub fn remove_quietly(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Move a finished temp file over `destination`.
///
/// Tries a rename first; when source and destination live on different
/// filesystems it falls back to copy plus delete.
pub fn promote(from: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| Error::Create {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    match std::fs::rename(from, destination) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(
                from = %from.display(),
                to = %destination.display(),
                error = %rename_err,
                "rename failed, copying instead"
            );
            std::fs::copy(from, destination).map_err(|source| Error::Promote {
                from: from.to_path_buf(),
                to: destination.to_path_buf(),
                source,
            })?;
            remove_quietly(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unique_paths_do_not_collide() -> Result<()> {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path().join("scratch"))?;
        assert!(scratch.path().is_dir());

        let a = scratch.unique_path("file.bin.0-99", "part");
        let b = scratch.unique_path("file.bin.0-99", "part");
        assert_ne!(a, b);
        assert!(a.starts_with(scratch.path()));
        assert!(a.to_string_lossy().ends_with(".part"));
        Ok(())
    }

    #[test]
    fn test_unique_path_sanitizes_stem() -> Result<()> {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path())?;
        let path = scratch.unique_path("../evil/name", "part");
        assert_eq!(path.parent(), Some(scratch.path()));

        let empty = scratch.unique_path("", "part");
        assert!(empty.file_name().unwrap().to_string_lossy().starts_with("download."));
        Ok(())
    }

    #[test]
    fn test_remove_quietly_ignores_missing() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        remove_quietly(&path)?;

        std::fs::write(&path, b"x").unwrap();
        remove_quietly(&path)?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_promote_creates_parent_and_moves() -> Result<()> {
        let dir = tempdir().unwrap();
        let from = dir.path().join("tmp.part");
        std::fs::write(&from, b"data").unwrap();

        let destination = dir.path().join("out").join("file.bin");
        promote(&from, &destination)?;
        assert!(!from.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"data");
        Ok(())
    }

    #[test]
    fn test_promote_replaces_existing() -> Result<()> {
        let dir = tempdir().unwrap();
        let from = dir.path().join("tmp.part");
        let destination = dir.path().join("file.bin");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&destination, b"old").unwrap();

        promote(&from, &destination)?;
        assert_eq!(std::fs::read(&destination).unwrap(), b"new");
        Ok(())
    }
}
