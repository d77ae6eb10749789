use std::collections::HashMap;

use crate::error::StorageError;
use crate::traits::{KvStore, SubstrateLimits};

/// In-process substrate with the same quota behaviour as the durable ones.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: HashMap<String, String>,
    limits: SubstrateLimits,
    used: usize,
}

impl MemoryKv {
    pub fn new(limits: SubstrateLimits) -> Self {
        Self {
            entries: HashMap::new(),
            limits,
            used: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let existing = self
            .entries
            .get(key)
            .map(|v| Self::entry_size(key, v))
            .unwrap_or(0);
        self.limits.check(key, value.len(), self.used - existing)?;
        self.used = self.used - existing + Self::entry_size(key, value);
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if let Some(old) = self.entries.remove(key) {
            self.used -= Self::entry_size(key, &old);
        }
        Ok(())
    }

    fn limits(&self) -> SubstrateLimits {
        self.limits
    }

    fn used_bytes(&self) -> Result<usize, StorageError> {
        Ok(self.used)
    }
}
