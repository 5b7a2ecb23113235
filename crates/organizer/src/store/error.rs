use thiserror::Error;

/// Errors produced by [`RulesStore`](super::RulesStore) operations.
///
/// Callers on the read path treat every variant as "no data".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("version mismatch: expected {expected}, found {found:?}")]
    VersionMismatch { expected: u32, found: Option<u64> },
    #[error("malformed file: {0}")]
    Malformed(String),
}
