use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("decryption failed: wrong key or tampered ciphertext")]
    Decryption,

    #[error("corrupted data under {key}: {reason}")]
    CorruptedData { key: String, reason: String },

    #[error("quota exceeded writing {key}: {requested} bytes requested, limit {limit}")]
    QuotaExceeded {
        key: String,
        requested: usize,
        limit: usize,
    },

    #[error("substrate failure: {0}")]
    Substrate(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub(crate) fn corrupted(key: &str, reason: impl Into<String>) -> Self {
        Self::CorruptedData {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
