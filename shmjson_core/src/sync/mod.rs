//! # Cross-process exclusion
//!
//! A named counting semaphore keyed the same way as shared regions. The
//! cache orchestrator holds it across the whole cold-path build; pure
//! readers of a stamped segment never take it.

pub mod semaphore;

pub use semaphore::{NamedSemaphore, SemGuard};
