// Fixed-slot memory pool serving variable-size allocations as
// contiguous slot runs

use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::BTreeSet;
use std::ptr::NonNull;

use crate::error::{ShmJsonError, ShmJsonResult};

/// Marker stored at the first slot of every live run so deallocation can
/// recover the run's extent.
#[repr(C)]
struct SlotHdr {
    run_len: u64,
}

const SLOT_HDR_SIZE: usize = std::mem::size_of::<SlotHdr>();

/// Allocation contract the relocatable hash table builds on. Returned
/// memory is zero-filled.
pub trait PoolAlloc {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;
    fn free(&self, ptr: NonNull<u8>);
}

struct PoolState {
    /// Free slot indices in ascending address order. Keeping the set
    /// ordered is what lets a contiguous physical run show up as
    /// consecutive entries, with no separate coalescing pass.
    free: BTreeSet<usize>,
    used: usize,
}

/// Carves a contiguous byte range into fixed-size slots and serves
/// variable-size allocations as runs of physically adjacent slots.
///
/// The pool never compacts or moves live allocations; a request with no
/// sufficiently long contiguous free run fails closed.
pub struct MemPool {
    base: NonNull<u8>,
    slot_size: usize,
    stride: usize,
    total: usize,
    state: Mutex<PoolState>,
    owned: Option<Layout>,
}

impl MemPool {
    /// Bytes a pool of `slot_count` slots of `slot_size` needs, slot
    /// headers included.
    pub fn required_bytes(slot_size: usize, slot_count: usize) -> usize {
        Self::stride_for(slot_size) * slot_count
    }

    // Slot headers (and therefore slot data) stay 8-aligned for any
    // slot size, assuming an 8-aligned base.
    fn stride_for(slot_size: usize) -> usize {
        (slot_size + SLOT_HDR_SIZE).next_multiple_of(8)
    }

    /// Create a pool over `source`, or over self-allocated storage when
    /// `source` is `None`.
    ///
    /// An external `source` (typically a shared region's data area) must
    /// be 8-aligned and at least [`required_bytes`](Self::required_bytes)
    /// long; the pool borrows it and never frees it.
    pub fn create(
        source: Option<NonNull<u8>>,
        slot_size: usize,
        slot_count: usize,
    ) -> ShmJsonResult<Self> {
        if slot_size == 0 || slot_count == 0 {
            return Err(ShmJsonError::pool_exhausted(
                "slot size and slot count must be nonzero",
            ));
        }

        let stride = Self::stride_for(slot_size);
        let (base, owned) = match source {
            Some(src) => {
                if src.as_ptr() as usize % 8 != 0 {
                    return Err(ShmJsonError::pool_exhausted(
                        "external pool storage must be 8-aligned",
                    ));
                }
                (src, None)
            }
            None => {
                let layout = Layout::from_size_align(stride * slot_count, 8)
                    .map_err(|e| ShmJsonError::Internal(format!("bad pool layout: {}", e)))?;
                let raw = unsafe { alloc_zeroed(layout) };
                let base = NonNull::new(raw).ok_or_else(|| {
                    ShmJsonError::pool_exhausted(format!(
                        "failed to allocate {} pool bytes",
                        layout.size()
                    ))
                })?;
                (base, Some(layout))
            }
        };

        log::debug!(
            "pool over {} slots of {} bytes (stride {})",
            slot_count,
            slot_size,
            stride
        );

        Ok(Self {
            base,
            slot_size,
            stride,
            total: slot_count,
            state: Mutex::new(PoolState {
                free: (0..slot_count).collect(),
                used: 0,
            }),
            owned,
        })
    }

    /// Allocate `size` bytes as a run of contiguous slots, zero-filled.
    /// Returns `None` when no sufficiently long contiguous run exists.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let run_len = (size + SLOT_HDR_SIZE).div_ceil(self.slot_size);
        if run_len > self.total {
            return None;
        }

        let mut state = self.state.lock();

        // A physically contiguous run of run_len free slots appears as
        // run_len consecutive indices in the ordered free set.
        let mut start = 0usize;
        let mut len = 0usize;
        let mut prev: Option<usize> = None;
        let mut found = false;
        for &idx in state.free.iter() {
            match prev {
                Some(p) if idx == p + 1 => len += 1,
                _ => {
                    start = idx;
                    len = 1;
                }
            }
            prev = Some(idx);
            if len == run_len {
                found = true;
                break;
            }
        }
        if !found {
            return None;
        }

        for idx in start..start + run_len {
            state.free.remove(&idx);
        }
        state.used += run_len;
        drop(state);

        let first = unsafe { self.base.as_ptr().add(start * self.stride) };
        let data = unsafe {
            (first as *mut SlotHdr).write(SlotHdr {
                run_len: run_len as u64,
            });
            let data = first.add(SLOT_HDR_SIZE);
            // The run's usable range spans the interior slots' header
            // bytes as well; zero the whole thing.
            std::ptr::write_bytes(data, 0, run_len * self.stride - SLOT_HDR_SIZE);
            data
        };

        // first is nonnull: base is nonnull and start is in range
        Some(unsafe { NonNull::new_unchecked(data) })
    }

    /// Return a run obtained from [`alloc`](Self::alloc) to the pool,
    /// reinserting its slots at their address-ordered position.
    pub fn free(&self, ptr: NonNull<u8>) {
        let base = self.base.as_ptr() as usize;
        let first = match (ptr.as_ptr() as usize).checked_sub(SLOT_HDR_SIZE) {
            Some(f) if f >= base && (f - base) % self.stride == 0 => f,
            _ => {
                log::warn!("pool free of pointer not from this pool: {:p}", ptr);
                return;
            }
        };

        let start = (first - base) / self.stride;
        if start >= self.total {
            log::warn!("pool free of pointer outside the slot arena: {:p}", ptr);
            return;
        }

        let run_len = unsafe { (*(first as *const SlotHdr)).run_len } as usize;
        if run_len == 0 || start + run_len > self.total {
            log::warn!(
                "pool free of run with corrupt length {} at slot {}",
                run_len,
                start
            );
            return;
        }

        let mut state = self.state.lock();
        for idx in start..start + run_len {
            if !state.free.insert(idx) {
                log::warn!("pool double free detected at slot {}", idx);
            }
        }
        state.used = state.used.saturating_sub(run_len);
    }

    /// Release self-owned storage and the pool's own control state.
    /// Borrowed storage is left untouched for its owner.
    pub fn destroy(self) {
        drop(self);
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn total_slots(&self) -> usize {
        self.total
    }

    pub fn used_slots(&self) -> usize {
        self.state.lock().used
    }

    pub fn free_slots(&self) -> usize {
        self.state.lock().free.len()
    }

    #[cfg(test)]
    fn free_indices(&self) -> Vec<usize> {
        self.state.lock().free.iter().copied().collect()
    }
}

impl PoolAlloc for MemPool {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        MemPool::alloc(self, size)
    }

    fn free(&self, ptr: NonNull<u8>) {
        MemPool::free(self, ptr)
    }
}

impl Drop for MemPool {
    fn drop(&mut self) {
        if let Some(layout) = self.owned.take() {
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

// The slot arena is raw bytes behind the state mutex; the pool itself
// provides no cross-process exclusion (that is the orchestrator's job).
unsafe impl Send for MemPool {}
unsafe impl Sync for MemPool {}
