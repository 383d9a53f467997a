//! # Cache orchestrator
//!
//! The top-level materialize/attach flow: checksum the raw input, use
//! the checksum as the region and lock key, and either reuse a
//! previously materialized parse or build one directly into
//! pool-allocated, offset-addressed storage.
//!
//! Control flow on a cold cache:
//! lock → region create → pool init over the data area → recursive
//! build (one relocatable table per object/array) → header stamp →
//! lock release. Any later caller, in any process, sees the stamped
//! header and walks the tree with no lock and no parse.

pub mod handle;
pub mod header;
pub mod store;
pub mod value;

/// Reserved key prefix array elements are stored under; enumeration
/// strips it so consumers see plain decimal keys.
pub const ARRAY_KEY_PREFIX: &str = "IDX_";

pub use handle::{JsonDoc, JsonHandle, JsonValue};
pub use header::{SegmentHeader, HEADER_SIZE, SEGMENT_MAGIC};
pub use store::{attach, materialize};
pub use value::ValueNode;
