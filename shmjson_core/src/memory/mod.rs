//! # Shared memory primitives
//!
//! This module provides the storage layers the cache is built on:
//!
//! - **ShmRegion**: named cross-process memory segments keyed by a 32-bit
//!   numeric key, mapped read-write or read-only
//! - **MemPool**: a fixed-slot allocator serving variable-size requests
//!   as contiguous slot runs inside a region's data area
//!
//! Region base pointers are process-local; everything stored inside a
//! region uses self-relative offsets (see [`crate::table`]) so the bytes
//! stay valid at whatever address another process maps them.

pub mod mempool;
pub mod platform;
pub mod shm_region;

pub use mempool::{MemPool, PoolAlloc};
pub use platform::{segment_path, semaphore_name, shm_base_dir};
pub use shm_region::{cleanup_registered_segments, AttachMode, ShmRegion};
