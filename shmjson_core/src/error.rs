// Error types for the shmjson runtime

use thiserror::Error;

/// Errors surfaced by the shared-memory cache layers.
///
/// Allocation and creation failures propagate upward immediately as a
/// failed result at each layer (region, pool, table, cache). A missing
/// key is not an error; lookups report absence through `Option`.
#[derive(Debug, Error)]
pub enum ShmJsonError {
    /// Shared memory segment creation or attach failure
    #[error("shared memory error: {0}")]
    Region(String),

    /// Named semaphore creation or wait failure
    #[error("semaphore error: {0}")]
    Semaphore(String),

    /// The pool has no sufficiently long contiguous free run
    #[error("pool allocation failed: {0}")]
    PoolExhausted(String),

    /// Hash table creation or insert failure
    #[error("table error: {0}")]
    Table(String),

    /// The input document was rejected by the parser
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// I/O error from the segment's backing file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("{0}")]
    Internal(String),
}

impl ShmJsonError {
    pub fn region(msg: impl Into<String>) -> Self {
        ShmJsonError::Region(msg.into())
    }

    pub fn semaphore(msg: impl Into<String>) -> Self {
        ShmJsonError::Semaphore(msg.into())
    }

    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        ShmJsonError::PoolExhausted(msg.into())
    }

    pub fn table(msg: impl Into<String>) -> Self {
        ShmJsonError::Table(msg.into())
    }
}

impl From<String> for ShmJsonError {
    fn from(msg: String) -> Self {
        ShmJsonError::Internal(msg)
    }
}

impl From<&str> for ShmJsonError {
    fn from(msg: &str) -> Self {
        ShmJsonError::Internal(msg.to_string())
    }
}

/// Result type used throughout the crate.
pub type ShmJsonResult<T> = Result<T, ShmJsonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_conversion() {
        let err: ShmJsonError = "something broke".into();
        assert!(matches!(err, ShmJsonError::Internal(_)));
        assert_eq!(err.to_string(), "something broke");
    }

    #[test]
    fn test_variant_display() {
        let err = ShmJsonError::pool_exhausted("no contiguous run of 4 slots");
        assert!(err.to_string().contains("no contiguous run"));
    }
}
