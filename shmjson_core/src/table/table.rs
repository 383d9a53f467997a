// Relocatable string-keyed hash table
//
// Bucket array and collision nodes live inside a pool allocator; every
// internal reference is a self-relative offset from the table header's
// own address, so the table stays valid after the enclosing region is
// remapped at a different base.

use std::mem;
use std::ptr::{self, NonNull};

use super::offset::RelOff;
use crate::error::{ShmJsonError, ShmJsonResult};
use crate::memory::mempool::PoolAlloc;

/// Grow-and-rehash when entries reach this many per bucket.
const LOAD_FACTOR_LIMIT: u32 = 1;
const MIN_BUCKETS: u32 = 16;
const HASH_MULTIPLIER: i32 = 1103515249;

/// In-region table header. All offsets anchor at this struct's address.
#[repr(C)]
pub struct TableHdr {
    bucket_off: RelOff,
    size: u32,
    entries: u32,
    downshift: u32,
    mask: u32,
    seq: u32,
    _pad: u32,
}

/// In-region collision node: a (key, data) pair plus chain link. `seq`
/// is the insertion ordinal, kept so consumers can reconstruct insertion
/// order from the hash-scrambled bucket layout.
#[repr(C)]
struct NodeHdr {
    data_off: RelOff,
    key_off: RelOff,
    next_off: RelOff,
    seq: u32,
    _pad: u32,
}

/// Diagnostic summary of a table's load quality.
#[derive(Debug, Clone, Copy)]
pub struct TableStats {
    pub buckets: u32,
    pub entries: u32,
    /// Average length of search: sum over chains of len*(len+1)/2,
    /// divided by the entry count.
    pub avg_chain_len: f32,
}

impl std::fmt::Display for TableStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buckets, {} entries, {:.2} avg chain",
            self.buckets, self.entries, self.avg_chain_len
        )
    }
}

fn hash_key(key: &[u8], mask: u32, downshift: u32) -> u32 {
    let mut i: i32 = 0;
    for &b in key {
        i = (i << 3).wrapping_add(b as i32 - b'0' as i32);
    }
    // the multiplicative step can overflow into the sign bit; clamp to
    // bucket 0 rather than index out of bounds
    let h = (i.wrapping_mul(HASH_MULTIPLIER) >> downshift) & mask as i32;
    if h < 0 {
        0
    } else {
        h as u32
    }
}

fn geometry(bucket_hint: u32) -> (u32, u32, u32) {
    let want = if bucket_hint == 0 {
        MIN_BUCKETS
    } else {
        bucket_hint.min(1 << 29)
    };
    let mut size = 2u32;
    let mut mask = 1u32;
    let mut downshift = 29u32;
    while size < want {
        size <<= 1;
        mask = (mask << 1) | 1;
        downshift -= 1;
    }
    (size, mask, downshift)
}

#[inline]
fn anchor(hdr: *const TableHdr) -> *const u8 {
    hdr as *const u8
}

unsafe fn buckets(hdr: *const TableHdr) -> *mut RelOff {
    (*hdr).bucket_off.resolve(anchor(hdr)) as *mut RelOff
}

unsafe fn node_key<'x>(hdr: *const TableHdr, node: *const NodeHdr) -> &'x [u8] {
    let block = (*node).key_off.resolve(anchor(hdr));
    let len = (block as *const u32).read() as usize;
    std::slice::from_raw_parts(block.add(mem::size_of::<u32>()), len)
}

unsafe fn raw_lookup(hdr: *const TableHdr, key: &[u8]) -> Option<NonNull<u8>> {
    let h = hash_key(key, (*hdr).mask, (*hdr).downshift) as usize;
    let buckets = buckets(hdr);
    let mut off = *buckets.add(h);
    while !off.is_null() {
        let node = off.resolve(anchor(hdr)) as *const NodeHdr;
        if node_key(hdr, node) == key {
            return NonNull::new((*node).data_off.resolve(anchor(hdr)));
        }
        off = (*node).next_off;
    }
    None
}

unsafe fn raw_enumerate(hdr: *const TableHdr, mut f: impl FnMut(usize, &[u8], u32, NonNull<u8>)) {
    let a = anchor(hdr);
    let buckets = buckets(hdr);
    let mut visit = 0usize;
    for i in 0..(*hdr).size as usize {
        let mut off = *buckets.add(i);
        while !off.is_null() {
            let node = off.resolve(a) as *const NodeHdr;
            if let Some(data) = NonNull::new((*node).data_off.resolve(a)) {
                f(visit, node_key(hdr, node), (*node).seq, data);
                visit += 1;
            }
            off = (*node).next_off;
        }
    }
}

unsafe fn raw_stats(hdr: *const TableHdr) -> TableStats {
    let a = anchor(hdr);
    let buckets = buckets(hdr);
    let entries = (*hdr).entries;
    let mut alos = 0u64;
    for i in 0..(*hdr).size as usize {
        let mut len = 0u64;
        let mut off = *buckets.add(i);
        while !off.is_null() {
            len += 1;
            off = (*(off.resolve(a) as *const NodeHdr)).next_off;
        }
        alos += len * (len + 1) / 2;
    }
    TableStats {
        buckets: (*hdr).size,
        entries,
        avg_chain_len: if entries == 0 {
            0.0
        } else {
            alos as f32 / entries as f32
        },
    }
}

/// Writer-side handle to a table, bound to the allocator its nodes come
/// from. Lookups and insertion order survive remapping; the handle
/// itself is process-local.
pub struct ShmTable<'a, A: PoolAlloc> {
    hdr: NonNull<TableHdr>,
    alloc: &'a A,
}

impl<'a, A: PoolAlloc> ShmTable<'a, A> {
    /// Allocate and initialize a table sized for about `bucket_hint`
    /// entries (rounded up to a power of two, at least 16 when zero).
    pub fn create(bucket_hint: u32, alloc: &'a A) -> ShmJsonResult<Self> {
        let hdr_raw = alloc
            .alloc(mem::size_of::<TableHdr>())
            .ok_or_else(|| ShmJsonError::table("table header allocation failed"))?;
        let hdr = hdr_raw.cast::<TableHdr>();

        let (size, mask, downshift) = geometry(bucket_hint);
        let arr = match alloc.alloc(size as usize * mem::size_of::<RelOff>()) {
            Some(a) => a,
            None => {
                alloc.free(hdr_raw);
                return Err(ShmJsonError::table("bucket array allocation failed"));
            }
        };

        // pool memory is zero-filled, so every bucket already reads as empty
        unsafe {
            hdr.as_ptr().write(TableHdr {
                bucket_off: RelOff::encode(hdr.as_ptr() as *const u8, arr.as_ptr()),
                size,
                entries: 0,
                downshift,
                mask,
                seq: 0,
                _pad: 0,
            });
        }

        Ok(Self { hdr, alloc })
    }

    /// Rebind a writer handle to a table previously created through the
    /// same allocator.
    ///
    /// # Safety
    ///
    /// `hdr` must point at a live, initialized table whose nodes were
    /// allocated from `alloc`.
    pub unsafe fn from_raw(hdr: NonNull<TableHdr>, alloc: &'a A) -> Self {
        Self { hdr, alloc }
    }

    /// Address of the in-region header, for storing as a relative
    /// reference elsewhere.
    pub fn as_ptr(&self) -> *const TableHdr {
        self.hdr.as_ptr()
    }

    /// Insert `key` bound to `data`. If the key is already present the
    /// existing binding is returned unchanged; otherwise the table grows
    /// as needed, the key bytes are copied into the pool, and `data` is
    /// returned. Allocator failure leaves previously stored entries
    /// intact.
    pub fn insert(&mut self, key: &str, data: NonNull<u8>) -> ShmJsonResult<NonNull<u8>> {
        let kb = key.as_bytes();
        unsafe {
            if let Some(existing) = raw_lookup(self.hdr.as_ptr(), kb) {
                return Ok(existing);
            }

            // grow before the insertion that would reach the load
            // factor bound, keeping entries < limit * size at all times
            while (*self.hdr.as_ptr()).entries + 1 >= LOAD_FACTOR_LIMIT * (*self.hdr.as_ptr()).size
            {
                self.grow()?;
            }

            let key_block = self
                .alloc
                .alloc(mem::size_of::<u32>() + kb.len())
                .ok_or_else(|| ShmJsonError::table("key allocation failed"))?;
            (key_block.as_ptr() as *mut u32).write(kb.len() as u32);
            ptr::copy_nonoverlapping(
                kb.as_ptr(),
                key_block.as_ptr().add(mem::size_of::<u32>()),
                kb.len(),
            );

            let node_raw = match self.alloc.alloc(mem::size_of::<NodeHdr>()) {
                Some(n) => n,
                None => {
                    self.alloc.free(key_block);
                    return Err(ShmJsonError::table("node allocation failed"));
                }
            };

            let hdr = self.hdr.as_ptr();
            let a = anchor(hdr);
            let h = hash_key(kb, (*hdr).mask, (*hdr).downshift) as usize;
            let buckets = buckets(hdr);
            let node = node_raw.as_ptr() as *mut NodeHdr;
            node.write(NodeHdr {
                data_off: RelOff::encode(a, data.as_ptr()),
                key_off: RelOff::encode(a, key_block.as_ptr()),
                next_off: *buckets.add(h),
                seq: (*hdr).seq,
                _pad: 0,
            });
            *buckets.add(h) = RelOff::encode(a, node as *const u8);
            (*hdr).entries += 1;
            (*hdr).seq += 1;

            Ok(data)
        }
    }

    // Double the bucket array and relink every node by its recomputed
    // hash. Geometry is only committed once the new array exists, so a
    // failed grow leaves the table in its prior valid state.
    unsafe fn grow(&mut self) -> ShmJsonResult<()> {
        let hdr = self.hdr.as_ptr();
        let a = anchor(hdr);
        let old_size = (*hdr).size as usize;
        let old_buckets = buckets(hdr);

        let new_size = (*hdr).size << 1;
        let new_mask = ((*hdr).mask << 1) | 1;
        let new_downshift = (*hdr).downshift - 1;

        let new_arr = self
            .alloc
            .alloc(new_size as usize * mem::size_of::<RelOff>())
            .ok_or_else(|| ShmJsonError::table("bucket array allocation failed during grow"))?;
        let new_buckets = new_arr.as_ptr() as *mut RelOff;

        for i in 0..old_size {
            let mut off = *old_buckets.add(i);
            while !off.is_null() {
                let node = off.resolve(a) as *mut NodeHdr;
                off = (*node).next_off;
                let h = hash_key(node_key(hdr, node), new_mask, new_downshift) as usize;
                (*node).next_off = *new_buckets.add(h);
                *new_buckets.add(h) = RelOff::encode(a, node as *const u8);
            }
        }

        (*hdr).bucket_off = RelOff::encode(a, new_arr.as_ptr());
        (*hdr).size = new_size;
        (*hdr).mask = new_mask;
        (*hdr).downshift = new_downshift;
        self.alloc.free(NonNull::new_unchecked(old_buckets as *mut u8));

        log::debug!(
            "table grew to {} buckets ({} entries)",
            new_size,
            (*hdr).entries
        );
        Ok(())
    }

    /// Unlink and free the matching node, returning its data reference.
    /// No rehash or shrink happens on removal.
    pub fn remove(&mut self, key: &str) -> Option<NonNull<u8>> {
        let kb = key.as_bytes();
        unsafe {
            let hdr = self.hdr.as_ptr();
            let a = anchor(hdr);
            let h = hash_key(kb, (*hdr).mask, (*hdr).downshift) as usize;
            let buckets = buckets(hdr);
            let mut prev: *mut NodeHdr = ptr::null_mut();
            let mut off = *buckets.add(h);
            while !off.is_null() {
                let node = off.resolve(a) as *mut NodeHdr;
                if node_key(hdr, node) == kb {
                    if prev.is_null() {
                        *buckets.add(h) = (*node).next_off;
                    } else {
                        (*prev).next_off = (*node).next_off;
                    }
                    let data = (*node).data_off.resolve(a);
                    let key_block = (*node).key_off.resolve(a);
                    self.alloc.free(NonNull::new_unchecked(key_block));
                    self.alloc.free(NonNull::new_unchecked(node as *mut u8));
                    (*hdr).entries -= 1;
                    return NonNull::new(data);
                }
                prev = node;
                off = (*node).next_off;
            }
            None
        }
    }

    pub fn lookup(&self, key: &str) -> Option<NonNull<u8>> {
        self.view().lookup(key)
    }

    pub fn enumerate(&self, f: impl FnMut(usize, &str, NonNull<u8>)) {
        self.view().enumerate(f)
    }

    pub fn entries(&self) -> u32 {
        self.view().entries()
    }

    pub fn stats(&self) -> TableStats {
        self.view().stats()
    }

    pub fn view(&self) -> TableView {
        TableView { hdr: self.hdr }
    }
}

/// Read-only view of a table, typically re-derived from a relative
/// reference after attaching a region. Needs no allocator.
#[derive(Clone, Copy)]
pub struct TableView {
    hdr: NonNull<TableHdr>,
}

impl TableView {
    /// Rebind to a table header at `ptr`.
    ///
    /// Returns `None` for a null pointer or a degenerate bucket count
    /// (a table with zero buckets is never produced by `create`).
    ///
    /// # Safety
    ///
    /// `ptr` must point into a live mapping holding an initialized table
    /// at this address.
    pub unsafe fn from_raw(ptr: *const TableHdr) -> Option<TableView> {
        let hdr = NonNull::new(ptr as *mut TableHdr)?;
        let size = (*ptr).size;
        if size == 0 || !size.is_power_of_two() {
            return None;
        }
        Some(TableView { hdr })
    }

    /// Walk the target bucket's chain comparing keys byte-for-byte.
    pub fn lookup(&self, key: &str) -> Option<NonNull<u8>> {
        unsafe { raw_lookup(self.hdr.as_ptr(), key.as_bytes()) }
    }

    /// Visit every (index, key, data) triple in bucket-then-chain order;
    /// `index` is a visitation counter starting at 0.
    pub fn enumerate(&self, mut f: impl FnMut(usize, &str, NonNull<u8>)) {
        unsafe {
            raw_enumerate(self.hdr.as_ptr(), |idx, key, _seq, data| {
                // keys were copied from &str by insert
                f(idx, std::str::from_utf8_unchecked(key), data)
            })
        }
    }

    /// Like `enumerate`, but also exposing each node's insertion
    /// ordinal. Used by the cache layer to re-establish document order.
    pub(crate) fn for_each_entry(&self, mut f: impl FnMut(u32, &str, NonNull<u8>)) {
        unsafe {
            raw_enumerate(self.hdr.as_ptr(), |_idx, key, seq, data| {
                f(seq, std::str::from_utf8_unchecked(key), data)
            })
        }
    }

    pub fn entries(&self) -> u32 {
        unsafe { (*self.hdr.as_ptr()).entries }
    }

    pub fn stats(&self) -> TableStats {
        unsafe { raw_stats(self.hdr.as_ptr()) }
    }
}
