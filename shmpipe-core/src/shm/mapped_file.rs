//! File-backed shared region.
//!
//! Maps `<dir>/<name>.ring` with `MAP_SHARED`. Any process mapping the same
//! path sees the same bytes, which makes this backing usable where POSIX
//! shared memory is not mounted.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::SharedMemoryError;
use crate::shm::region::{flock_fd, Mapping, SharedRegion};
use crate::shm::registry::writer_lock_for;

/// File extension for ring files.
pub const RING_FILE_EXTENSION: &str = "ring";

/// A shared region backed by a regular file.
pub struct MappedFileRegion {
    name: String,
    path: PathBuf,
    mapping: Mapping,
    file: File,
    writer: Arc<Mutex<()>>,
}

impl MappedFileRegion {
    /// Open `<dir>/<name>.ring`, creating the directory and file if needed.
    ///
    /// A fresh (empty) file is extended to `size` bytes; an existing file must
    /// already be exactly that long.
    pub fn open_or_create(
        dir: impl AsRef<Path>,
        name: &str,
        size: usize,
    ) -> Result<Self, SharedMemoryError> {
        if name.is_empty() {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Name cannot be empty".to_string(),
            });
        }
        if size == 0 {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Size must be non-zero".to_string(),
            });
        }

        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("cannot create {}: {}", dir.display(), e),
        })?;

        let path = Self::path_for(dir, name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("cannot open {}: {}", path.display(), e),
            })?;

        let actual = file
            .metadata()
            .map_err(|e| SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("cannot stat {}: {}", path.display(), e),
            })?
            .len() as usize;

        if actual == 0 {
            file.set_len(size as u64)
                .map_err(|e| SharedMemoryError::CreateFailed {
                    name: name.to_string(),
                    reason: format!("cannot size {}: {}", path.display(), e),
                })?;
        } else if actual != size {
            return Err(SharedMemoryError::SizeMismatch {
                name: name.to_string(),
                expected: size,
                actual,
            });
        }

        let mapping = Mapping::map(file.as_raw_fd(), size)?;

        // Different spellings of one path must land on the same mutex
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        let writer = writer_lock_for(&format!("file:{}", canonical.display()));

        tracing::debug!(name = %name, path = %path.display(), size = size, "Opened file-backed region");

        Ok(Self {
            name: name.to_string(),
            path,
            mapping,
            file,
            writer,
        })
    }

    /// Backing file location for a queue name.
    pub fn path_for(dir: impl AsRef<Path>, name: &str) -> PathBuf {
        dir.as_ref().join(format!("{}.{}", name, RING_FILE_EXTENSION))
    }

    /// Delete the backing file for `name` under `dir`.
    pub fn remove(dir: impl AsRef<Path>, name: &str) -> Result<(), SharedMemoryError> {
        let path = Self::path_for(dir, name);
        std::fs::remove_file(&path).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("cannot remove {}: {}", path.display(), e),
        })?;
        tracing::debug!(path = %path.display(), "Removed ring file");
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SharedRegion for MappedFileRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.mapping.size()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), SharedMemoryError> {
        self.mapping.read(offset, dst)
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), SharedMemoryError> {
        self.mapping.write(offset, src)
    }

    fn try_lock_exclusive(&self) -> Result<bool, SharedMemoryError> {
        flock_fd(self.file.as_raw_fd(), &self.name, libc::LOCK_EX | libc::LOCK_NB)
    }

    fn unlock(&self) -> Result<(), SharedMemoryError> {
        flock_fd(self.file.as_raw_fd(), &self.name, libc::LOCK_UN).map(|_| ())
    }

    fn writer_mutex(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_two_handles_see_same_bytes() {
        let dir = TempDir::new().unwrap();
        let writer = MappedFileRegion::open_or_create(dir.path(), "queue", 4096).unwrap();
        let reader = MappedFileRegion::open_or_create(dir.path(), "queue", 4096).unwrap();

        writer.write_at(4092, &[7, 7, 7, 7]).unwrap();
        let mut out = [0u8; 4];
        reader.read_at(4092, &mut out).unwrap();
        assert_eq!(out, [7, 7, 7, 7]);
        assert_eq!(reader.path(), dir.path().join("queue.ring"));
    }

    #[test]
    fn test_existing_file_too_small() {
        let dir = TempDir::new().unwrap();
        let _small = MappedFileRegion::open_or_create(dir.path(), "queue", 1024).unwrap();
        let err = MappedFileRegion::open_or_create(dir.path(), "queue", 4096)
            .err()
            .unwrap();
        assert!(matches!(err, SharedMemoryError::SizeMismatch { actual: 1024, .. }));
    }

    #[test]
    fn test_existing_file_too_large() {
        let dir = TempDir::new().unwrap();
        let _big = MappedFileRegion::open_or_create(dir.path(), "queue", 8192).unwrap();
        let err = MappedFileRegion::open_or_create(dir.path(), "queue", 4096)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SharedMemoryError::SizeMismatch {
                expected: 4096,
                actual: 8192,
                ..
            }
        ));
    }

    #[test]
    fn test_handles_on_one_file_share_writer_mutex() {
        let dir = TempDir::new().unwrap();
        let first = MappedFileRegion::open_or_create(dir.path(), "queue", 4096).unwrap();
        let second = MappedFileRegion::open_or_create(dir.path().join("."), "queue", 4096).unwrap();
        let other = MappedFileRegion::open_or_create(dir.path(), "other", 4096).unwrap();

        assert!(Arc::ptr_eq(&first.writer_mutex(), &second.writer_mutex()));
        assert!(!Arc::ptr_eq(&first.writer_mutex(), &other.writer_mutex()));
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        drop(MappedFileRegion::open_or_create(dir.path(), "gone", 1024).unwrap());
        MappedFileRegion::remove(dir.path(), "gone").unwrap();
        assert!(!MappedFileRegion::path_for(dir.path(), "gone").exists());
    }
}
