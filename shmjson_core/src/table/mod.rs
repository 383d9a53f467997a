//! # Relocatable hash table
//!
//! A string-keyed hash map whose bucket array and collision nodes live
//! inside a [`MemPool`](crate::memory::MemPool) (or any
//! [`PoolAlloc`](crate::memory::PoolAlloc) implementor) and whose
//! internal links are self-relative byte offsets from the table's own
//! address. The same byte layout stays valid at whatever base address a
//! process maps the enclosing region.

pub mod offset;
pub mod table;

pub use offset::RelOff;
pub use table::{ShmTable, TableHdr, TableStats, TableView};
