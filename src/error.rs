//! Error types for labelvol operations

use thiserror::Error;

/// Main error type for label-volume operations
#[derive(Error, Debug)]
pub enum LabelvolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("batch commit failed: {0}")]
    BatchCommit(String),

    #[error("backing store not configured for role: {0}")]
    BackingStoreUnavailable(&'static str),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for label-volume operations
pub type Result<T> = std::result::Result<T, LabelvolError>;

impl From<serde_json::Error> for LabelvolError {
    fn from(err: serde_json::Error) -> Self {
        LabelvolError::Serialization(err.to_string())
    }
}
