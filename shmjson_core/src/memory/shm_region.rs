// Shared memory region keyed by a 32-bit numeric key

use memmap2::{Mmap, MmapMut, MmapOptions};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use super::platform::segment_path;
use crate::error::{ShmJsonError, ShmJsonResult};

/// How a process maps a segment into its own address space.
///
/// The base pointer returned by [`ShmRegion::as_ptr`] is process-local;
/// two processes attaching the same key will generally see different
/// addresses. Structures stored inside the region must therefore never
/// hold absolute pointers, only self-relative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug)]
enum Mapping {
    Rw(MmapMut),
    Ro(Mmap),
}

/// A named shared memory block backed by a file under the platform shm
/// directory, addressable by any process that knows the numeric key.
#[derive(Debug)]
pub struct ShmRegion {
    mapping: Mapping,
    size: usize,
    path: PathBuf,
    _file: File,
    key: u32,
    owner: bool,
}

// Segments registered for best-effort removal. Cleanup is an explicit,
// opt-in call, never an implicit signal handler.
static CLEANUP_REGISTRY: Lazy<Mutex<Vec<PathBuf>>> = Lazy::new(|| Mutex::new(Vec::new()));

impl ShmRegion {
    /// Create or attach the segment for `key`, sized at least `size` bytes.
    ///
    /// The first process to use a key creates (and zero-fills) the backing
    /// file; later callers attach to the existing bytes. An existing file
    /// smaller than `size` is extended.
    pub fn create(key: u32, size: usize, mode: AttachMode) -> ShmJsonResult<Self> {
        if size == 0 {
            return Err(ShmJsonError::region("segment size must be nonzero"));
        }

        let path = segment_path(key);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let (file, is_owner) = if path.exists() {
            let file = OpenOptions::new()
                .read(true)
                .write(mode == AttachMode::ReadWrite)
                .open(&path)?;

            let metadata = file.metadata()?;
            if metadata.len() < size as u64 {
                if mode == AttachMode::ReadWrite {
                    file.set_len(size as u64)?;
                } else {
                    // cannot grow a read-only attachment to the mapping size
                    return Err(ShmJsonError::region(format!(
                        "segment 0x{:08x} is {} bytes, {} requested",
                        key,
                        metadata.len(),
                        size
                    )));
                }
            }

            (file, false)
        } else {
            if mode == AttachMode::ReadOnly {
                return Err(ShmJsonError::region(format!(
                    "segment 0x{:08x} does not exist",
                    key
                )));
            }

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(size as u64)?;
            (file, true)
        };

        let mapping = match mode {
            AttachMode::ReadWrite => {
                let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
                if is_owner {
                    mmap.fill(0);
                }
                Mapping::Rw(mmap)
            }
            AttachMode::ReadOnly => {
                let mmap = unsafe { MmapOptions::new().len(size).map(&file)? };
                Mapping::Ro(mmap)
            }
        };

        log::info!(
            "{} segment 0x{:08x} ({} bytes, {:?})",
            if is_owner { "created" } else { "attached" },
            key,
            size,
            mode
        );

        Ok(Self {
            mapping,
            size,
            path,
            _file: file,
            key,
            owner: is_owner,
        })
    }

    /// Attach an existing segment without creating it, sized from the
    /// backing file.
    pub fn open(key: u32, mode: AttachMode) -> ShmJsonResult<Self> {
        let path = segment_path(key);
        if !path.exists() {
            return Err(ShmJsonError::region(format!(
                "segment 0x{:08x} does not exist",
                key
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(mode == AttachMode::ReadWrite)
            .open(&path)?;
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(ShmJsonError::region(format!(
                "segment 0x{:08x} has an empty backing file",
                key
            )));
        }

        let mapping = match mode {
            AttachMode::ReadWrite => {
                Mapping::Rw(unsafe { MmapOptions::new().len(size).map_mut(&file)? })
            }
            AttachMode::ReadOnly => Mapping::Ro(unsafe { MmapOptions::new().len(size).map(&file)? }),
        };

        log::debug!("opened segment 0x{:08x} ({} bytes, {:?})", key, size, mode);

        Ok(Self {
            mapping,
            size,
            path,
            _file: file,
            key,
            owner: false,
        })
    }

    /// Base pointer of the mapping in this process.
    pub fn as_ptr(&self) -> *const u8 {
        match &self.mapping {
            Mapping::Rw(m) => m.as_ptr(),
            Mapping::Ro(m) => m.as_ptr(),
        }
    }

    /// Mutable base pointer; `None` for read-only attachments.
    pub fn as_mut_ptr(&mut self) -> Option<*mut u8> {
        match &mut self.mapping {
            Mapping::Rw(m) => Some(m.as_mut_ptr()),
            Mapping::Ro(_) => None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.mapping, Mapping::Ro(_))
    }

    /// Detach and remove the backing file, ending the segment's life for
    /// every process. Plain `drop` only detaches.
    pub fn unlink(self) -> ShmJsonResult<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    /// Record this segment for [`cleanup_registered_segments`]. Intended
    /// for callers that want crash-recovery sweeps between runs; nothing
    /// is removed automatically.
    pub fn register_for_cleanup(&self) {
        let mut registry = CLEANUP_REGISTRY.lock();
        if !registry.contains(&self.path) {
            registry.push(self.path.clone());
        }
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // Detach only. The backing file persists so other processes (and
        // later runs) keep seeing the cached bytes; removal is explicit
        // via unlink() or the cleanup registry.
    }
}

// The mapping is plain bytes; synchronization of its contents is the
// caller's responsibility (see the cache orchestrator's lock discipline).
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

/// Best-effort removal of every segment registered with
/// [`ShmRegion::register_for_cleanup`] in this process. Returns how many
/// backing files were actually removed.
pub fn cleanup_registered_segments() -> usize {
    let mut registry = CLEANUP_REGISTRY.lock();
    let mut removed = 0;
    for path in registry.drain(..) {
        if std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}
