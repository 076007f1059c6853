//! Shared region providers.
//!
//! `SharedRegion` is the only capability the circular buffer needs: a
//! fixed-size, byte-addressable region that several processes can open under
//! the same name. POSIX shared memory and file-backed mappings implement it
//! for cross-process use; `HeapRegion` serves single-process pipes and tests.
//! All unsafe operations are encapsulated with bounds checking.

use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::SharedMemoryError;
use crate::shm::registry::writer_lock_for;

/// A fixed-size byte region shared by every participant of a queue.
pub trait SharedRegion: Send + Sync {
    /// Name the region was opened under.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn size(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset` out of the region.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), SharedMemoryError>;

    /// Copy `src` into the region starting at `offset`.
    fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), SharedMemoryError>;

    /// Try to take an exclusive cross-process writer lock without blocking.
    ///
    /// Returns `Ok(false)` if another holder has it. Regions that cannot be
    /// shared across processes always succeed.
    fn try_lock_exclusive(&self) -> Result<bool, SharedMemoryError> {
        Ok(true)
    }

    /// Release a lock taken with `try_lock_exclusive`.
    fn unlock(&self) -> Result<(), SharedMemoryError> {
        Ok(())
    }

    /// In-process writer mutex shared by every handle on the same backing object.
    fn writer_mutex(&self) -> Arc<Mutex<()>>;
}

pub(crate) fn check_bounds(
    offset: usize,
    length: usize,
    size: usize,
) -> Result<(), SharedMemoryError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(SharedMemoryError::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}

/// A `MAP_SHARED` mapping of a file descriptor. Unmapped on drop.
pub(crate) struct Mapping {
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: Mapping owns its memory; concurrent access is mediated by the
// circular buffer's writer lock and checksum protocol.
unsafe impl Send for Mapping {}

// SAFETY: All access goes through bounds-checked copies.
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Map `size` bytes of `fd` read/write and shared.
    pub(crate) fn map(fd: i32, size: usize) -> Result<Self, SharedMemoryError> {
        // SAFETY: fd is a valid descriptor owned by the caller, size is non-zero
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })?;

        Ok(Self { ptr, size })
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), SharedMemoryError> {
        check_bounds(offset, dst.len(), self.size)?;
        // SAFETY: range checked above; dst is a distinct local buffer
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    pub(crate) fn write(&self, offset: usize, src: &[u8]) -> Result<(), SharedMemoryError> {
        check_bounds(offset, src.len(), self.size)?;
        // SAFETY: range checked above; src is a distinct local buffer
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr and size come from a successful mmap
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }
    }
}

/// Take or release a `flock` on `fd`.
pub(crate) fn flock_fd(fd: i32, name: &str, operation: i32) -> Result<bool, SharedMemoryError> {
    // SAFETY: fd is a valid open descriptor
    let result = unsafe { libc::flock(fd, operation) };
    if result == 0 {
        return Ok(true);
    }

    let errno = std::io::Error::last_os_error();
    if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }

    Err(SharedMemoryError::LockFailed {
        name: name.to_string(),
        reason: errno.to_string(),
    })
}

/// Size of the object behind `fd`, from fstat.
pub(crate) fn fd_size(fd: i32, name: &str) -> Result<usize, SharedMemoryError> {
    // SAFETY: stat is plain old data; fstat fills it on success
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is a valid descriptor and stat points to writable memory
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result < 0 {
        return Err(SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("fstat failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(stat.st_size as usize)
}

/// Represents a mapped POSIX shared memory region.
///
/// The memory can be shared between processes using the same name. The
/// object is left in place when dropped unless `unlink_on_drop` is set, since
/// other participants may still be attached.
pub struct SharedMemoryRegion {
    /// Name of the shared memory object (without the leading /).
    name: String,
    /// The live mapping.
    mapping: Mapping,
    /// File descriptor for the shared memory object.
    fd: i32,
    /// Unlink the object when this handle is dropped.
    unlink_on_drop: bool,
    /// Writer mutex shared with other handles on this name.
    writer: Arc<Mutex<()>>,
}

impl SharedMemoryRegion {
    /// Minimum size for a shared memory region.
    pub const MIN_SIZE: usize = 4096;

    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Open the named region, creating and sizing it if it does not exist yet.
    ///
    /// An existing region must be exactly `size` bytes long.
    pub fn open_or_create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::validate(name, size)?;
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd >= 0 {
            return Self::finish(name, fd, size, true);
        }

        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::EEXIST) {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        Self::open(name, size)
    }

    /// Open an existing shared memory region.
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::validate(name, size)?;
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        Self::finish(name, fd, size, false)
    }

    /// Remove the named object from the shared memory namespace.
    ///
    /// Processes that already mapped it keep their mapping.
    pub fn unlink(name: &str) -> Result<(), SharedMemoryError> {
        let c_name = Self::c_name(name)?;
        // SAFETY: c_name is a valid CString
        let result = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if result < 0 {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_unlink failed: {}", std::io::Error::last_os_error()),
            });
        }
        tracing::debug!(name = %name, "Unlinked shared memory region");
        Ok(())
    }

    /// Unlink the object when this handle is dropped.
    pub fn with_unlink_on_drop(mut self, unlink: bool) -> Self {
        self.unlink_on_drop = unlink;
        self
    }

    fn validate(name: &str, size: usize) -> Result<(), SharedMemoryError> {
        if name.is_empty() {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Name cannot be empty".to_string(),
            });
        }
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!(
                    "Size {} is outside {}..={}",
                    size,
                    Self::MIN_SIZE,
                    Self::MAX_SIZE
                ),
            });
        }
        Ok(())
    }

    fn c_name(name: &str) -> Result<CString, SharedMemoryError> {
        CString::new(format!("/{}", name)).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })
    }

    /// Size the object if it is fresh, then map it. Closes fd on failure.
    fn finish(name: &str, fd: i32, size: usize, created: bool) -> Result<Self, SharedMemoryError> {
        let prepared = Self::ensure_size(name, fd, size).and_then(|()| Mapping::map(fd, size));

        match prepared {
            Ok(mapping) => {
                tracing::debug!(name = %name, size = size, created = created, "Opened shared memory region");
                Ok(Self {
                    name: name.to_string(),
                    mapping,
                    fd,
                    unlink_on_drop: false,
                    writer: writer_lock_for(&format!("shm:/{}", name)),
                })
            }
            Err(e) => {
                // SAFETY: fd was opened above and is not shared
                unsafe { libc::close(fd) };
                if created {
                    let _ = Self::unlink(name);
                }
                Err(e)
            }
        }
    }

    fn ensure_size(name: &str, fd: i32, size: usize) -> Result<(), SharedMemoryError> {
        let actual = fd_size(fd, name)?;

        // A zero-length object was just created by us or by a racing opener
        if actual == 0 {
            // SAFETY: fd is a valid file descriptor
            let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if result < 0 {
                return Err(SharedMemoryError::CreateFailed {
                    name: name.to_string(),
                    reason: format!("ftruncate failed: {}", std::io::Error::last_os_error()),
                });
            }
            return Ok(());
        }

        // The footer sits at size - 4, so every participant must agree on size
        if actual != size {
            return Err(SharedMemoryError::SizeMismatch {
                name: name.to_string(),
                expected: size,
                actual,
            });
        }

        Ok(())
    }
}

impl SharedRegion for SharedMemoryRegion {
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
        flock_fd(self.fd, &self.name, libc::LOCK_EX | libc::LOCK_NB)
    }

    fn unlock(&self) -> Result<(), SharedMemoryError> {
        flock_fd(self.fd, &self.name, libc::LOCK_UN).map(|_| ())
    }

    fn writer_mutex(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.writer)
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: fd was opened during construction
        unsafe { libc::close(self.fd) };

        if self.unlink_on_drop {
            if let Err(e) = Self::unlink(&self.name) {
                tracing::warn!(name = %self.name, error = %e, "Failed to unlink shared memory region");
            }
        }
    }
}

/// A process-private region on the heap.
///
/// Behaves like a shared region for publishers and subscribers living in the
/// same process.
pub struct HeapRegion {
    name: String,
    bytes: Mutex<Vec<u8>>,
    writer: Arc<Mutex<()>>,
}

impl HeapRegion {
    /// Allocate a zeroed region of `size` bytes.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            bytes: Mutex::new(vec![0u8; size]),
            writer: Arc::new(Mutex::new(())),
        }
    }
}

impl SharedRegion for HeapRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), SharedMemoryError> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        check_bounds(offset, dst.len(), bytes.len())?;
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), SharedMemoryError> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        check_bounds(offset, src.len(), bytes.len())?;
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn writer_mutex(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("shmpipe-test-{}-{}", tag, std::process::id())
    }

    #[test]
    fn test_shm_size_validation() {
        // Too small
        assert!(SharedMemoryRegion::open_or_create("test-small", 100).is_err());

        // Too large
        assert!(SharedMemoryRegion::open_or_create(
            "test-large",
            SharedMemoryRegion::MAX_SIZE + 1
        )
        .is_err());
    }

    #[test]
    fn test_shm_empty_name() {
        assert!(SharedMemoryRegion::open_or_create("", 4096).is_err());
    }

    #[test]
    fn test_open_or_create_shares_bytes() {
        let name = unique_name("share");
        let first = SharedMemoryRegion::open_or_create(&name, 4096)
            .unwrap()
            .with_unlink_on_drop(true);
        let second = SharedMemoryRegion::open_or_create(&name, 4096).unwrap();

        first.write_at(100, b"hello").unwrap();
        let mut out = [0u8; 5];
        second.read_at(100, &mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn test_open_larger_than_existing_fails() {
        let name = unique_name("grow");
        let _first = SharedMemoryRegion::open_or_create(&name, 4096)
            .unwrap()
            .with_unlink_on_drop(true);
        let err = SharedMemoryRegion::open(&name, 8192).err().unwrap();
        assert!(matches!(err, SharedMemoryError::SizeMismatch { .. }));
    }

    #[test]
    fn test_open_smaller_than_existing_fails() {
        let name = unique_name("shrink");
        let _first = SharedMemoryRegion::open_or_create(&name, 8192)
            .unwrap()
            .with_unlink_on_drop(true);
        let err = SharedMemoryRegion::open_or_create(&name, 4096).err().unwrap();
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
    fn test_flock_excludes_second_handle() {
        let name = unique_name("lock");
        let first = SharedMemoryRegion::open_or_create(&name, 4096)
            .unwrap()
            .with_unlink_on_drop(true);
        let second = SharedMemoryRegion::open(&name, 4096).unwrap();

        assert!(first.try_lock_exclusive().unwrap());
        assert!(!second.try_lock_exclusive().unwrap());
        first.unlock().unwrap();
        assert!(second.try_lock_exclusive().unwrap());
        second.unlock().unwrap();
    }

    #[test]
    fn test_heap_region_bounds() {
        let region = HeapRegion::new("heap", 16);
        assert!(region.write_at(12, &[1, 2, 3, 4]).is_ok());
        assert!(matches!(
            region.write_at(13, &[1, 2, 3, 4]),
            Err(SharedMemoryError::OutOfBounds { .. })
        ));

        let mut out = [0u8; 4];
        region.read_at(12, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
