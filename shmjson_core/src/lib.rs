//! # shmjson Core
//!
//! A cross-process, content-addressed cache for parsed JSON documents,
//! stored in shared memory so independent processes read one parsed
//! structure without re-parsing or private copies.
//!
//! The building blocks:
//!
//! - **Memory**: named shared regions keyed by a 32-bit checksum, plus a
//!   fixed-slot pool allocator serving contiguous-run allocations inside
//!   a region's data area
//! - **Table**: a relocatable hash table whose internal links are
//!   self-relative offsets, valid at any mapping address
//! - **Sync**: a named counting semaphore serializing cold-path builds
//!   across processes
//! - **Cache**: the orchestrator tying it together behind
//!   [`materialize`] and [`attach`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmjson_core::{materialize, JsonValue};
//!
//! let doc = materialize(r#"{"name": "probe", "samples": [1, 2, 3]}"#)?;
//! match doc.root().resolve("name") {
//!     Some(JsonValue::Str(s)) => println!("name = {}", s),
//!     _ => println!("no name member"),
//! }
//! # Ok::<(), shmjson_core::ShmJsonError>(())
//! ```
//!
//! ## Memory Safety
//!
//! A tree is written once, under the lock, by the process that first
//! sees a checksum; the header stamp is the last write before the lock
//! releases. Everything after that is read-only traversal, so readers
//! need no synchronization at all.

pub mod cache;
pub mod error;
pub mod memory;
pub mod sync;
pub mod table;

// Re-export commonly used types for easy access
pub use cache::{attach, materialize, JsonDoc, JsonHandle, JsonValue};
pub use error::{ShmJsonError, ShmJsonResult};
pub use memory::{AttachMode, MemPool, PoolAlloc, ShmRegion};
pub use sync::NamedSemaphore;
pub use table::{RelOff, ShmTable, TableStats, TableView};
