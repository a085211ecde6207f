//! ==============================================================================
//! error.rs - error taxonomy for the sync engine
//! ==============================================================================
//!
//! purpose:
//!     one enum for every failure the engine and its collaborators can report.
//!     the variant decides the propagation policy:
//!     - Fetch / Decode: the remote source failed or answered with a bad shape
//!     - Format: a day-block could not be normalized (bad date, misaligned arrays)
//!     - Store: the time-series sink rejected a write
//!     - Storage: the state backend could not be read or written
//!     - Corrupt: the state backend returned a payload we cannot decode
//!
//! relationships:
//!     - produced by: tags/client.rs, normalize.rs, sink.rs, watermark.rs
//!     - consumed by: engine.rs, poller.rs, backfill.rs, main.rs
//!
//! ==============================================================================

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("malformed day-block: {0}")]
    Format(String),

    #[error("sink rejected write: {0}")]
    Store(String),

    #[error("state backend error: {0}")]
    Storage(String),

    #[error("corrupt state payload: {0}")]
    Corrupt(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Fetch(_) => "fetch",
            SyncError::Decode(_) => "decode",
            SyncError::Format(_) => "format",
            SyncError::Store(_) => "store",
            SyncError::Storage(_) => "storage",
            SyncError::Corrupt(_) => "corrupt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_detail() {
        let err = SyncError::Fetch("status 500 from GetMultiTagStatsRaw".into());
        assert_eq!(err.to_string(), "fetch failed: status 500 from GetMultiTagStatsRaw");
        assert_eq!(err.kind(), "fetch");
    }

    #[test]
    fn test_corrupt_is_distinct_from_storage() {
        assert_ne!(SyncError::Corrupt("x".into()).kind(), SyncError::Storage("x".into()).kind());
    }
}
