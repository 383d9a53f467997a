//! # shmjson - shared-memory JSON cache
//!
//! shmjson materializes a parsed JSON document into an OS shared memory
//! segment keyed by the input's checksum, so every process on the host
//! reads one parsed structure with no re-parsing and no private copy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmjson::prelude::*;
//!
//! let doc = materialize(r#"{"fleet": [{"id": 1}, {"id": 2}]}"#)?;
//! let fleet = doc.root().resolve("fleet").unwrap();
//! for (index, unit) in fleet.as_node().unwrap().children() {
//!     println!("unit {} -> {:?}", index, unit);
//! }
//! # Ok::<(), shmjson::ShmJsonError>(())
//! ```
//!
//! ## Features
//!
//! - **One parse per host** for identical content, across processes
//! - **Relocatable storage**: every in-segment link is a self-relative
//!   offset, valid at any mapping address
//! - **Lock-free reads** of a stamped tree; only the cold-path build
//!   takes the named lock

// Re-export core components
pub use shmjson_core::{self, *};

/// The shmjson prelude - everything you need to get started
pub mod prelude {
    // Cache entry points and handles
    pub use shmjson_core::cache::{attach, materialize, JsonDoc, JsonHandle, JsonValue};

    // Storage layers, for callers composing their own segments
    pub use shmjson_core::memory::{AttachMode, MemPool, PoolAlloc, ShmRegion};
    pub use shmjson_core::sync::NamedSemaphore;
    pub use shmjson_core::table::{ShmTable, TableView};

    // Error types
    pub use shmjson_core::error::{ShmJsonError, ShmJsonResult};
    pub type Result<T> = ShmJsonResult<T>;
}
