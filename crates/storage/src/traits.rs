use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Size limits imposed by the host key/value substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateLimits {
    /// Total bytes (keys plus values) the substrate holds.
    pub capacity_bytes: usize,
    /// Largest single value accepted by `set`.
    pub max_entry_bytes: usize,
}

impl Default for SubstrateLimits {
    fn default() -> Self {
        Self {
            capacity_bytes: 5 * 1024 * 1024,
            max_entry_bytes: 256 * 1024,
        }
    }
}

impl SubstrateLimits {
    /// Reject a write of `value_len` bytes that would bring usage from
    /// `used_without_key` (usage excluding the current entry under `key`)
    /// past capacity, or that exceeds the per-entry limit.
    pub fn check(&self, key: &str, value_len: usize, used_without_key: usize) -> Result<(), StorageError> {
        if value_len > self.max_entry_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                requested: value_len,
                limit: self.max_entry_bytes,
            });
        }
        let total = used_without_key + key.len() + value_len;
        if total > self.capacity_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                requested: total,
                limit: self.capacity_bytes,
            });
        }
        Ok(())
    }
}

/// String-only key/value substrate with bounded capacity.
///
/// Implementations must leave the previous value in place when `set` fails.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    fn limits(&self) -> SubstrateLimits;

    fn used_bytes(&self) -> Result<usize, StorageError>;
}
