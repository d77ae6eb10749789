use std::cell::Cell;
use std::collections::HashSet;

use tempfile::TempDir;

use planvault_storage::{KvStore, SqliteKv, StorageError, SubstrateLimits};

/// Substrate wrapper that starts failing after a set number of writes.
/// Once tripped every `set` and `remove` fails until [`heal`](Self::heal),
/// which models a process dying mid-write: nothing gets cleaned up.
/// Reads and removes of single keys can be made to fail separately.
#[derive(Debug)]
pub struct FlakyKv<K> {
    inner: K,
    sets_before_failure: Option<usize>,
    tripped: bool,
    sets: usize,
    failing_gets: Cell<usize>,
    failing_removes: HashSet<String>,
}

impl<K: KvStore> FlakyKv<K> {
    pub fn new(inner: K) -> Self {
        Self {
            inner,
            sets_before_failure: None,
            tripped: false,
            sets: 0,
            failing_gets: Cell::new(0),
            failing_removes: HashSet::new(),
        }
    }

    /// Let the next `sets` writes through, then fail.
    pub fn fail_after(&mut self, sets: usize) {
        self.sets_before_failure = Some(sets);
        self.tripped = false;
    }

    /// Fail the next `gets` reads, whatever key they ask for.
    pub fn fail_next_gets(&mut self, gets: usize) {
        self.failing_gets.set(gets);
    }

    /// Fail every `remove` of `key` until healed.
    pub fn fail_removes_of(&mut self, key: &str) {
        self.failing_removes.insert(key.to_string());
    }

    pub fn heal(&mut self) {
        self.sets_before_failure = None;
        self.tripped = false;
        self.failing_gets.set(0);
        self.failing_removes.clear();
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Successful `set` calls so far.
    pub fn set_count(&self) -> usize {
        self.sets
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut K {
        &mut self.inner
    }

    fn injected(&self, key: &str) -> StorageError {
        StorageError::Substrate(format!("injected failure writing {key}"))
    }

    fn injected_read(&self, key: &str) -> StorageError {
        StorageError::Substrate(format!("injected failure reading {key}"))
    }
}

impl<K: KvStore> KvStore for FlakyKv<K> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let failing = self.failing_gets.get();
        if failing > 0 {
            self.failing_gets.set(failing - 1);
            return Err(self.injected_read(key));
        }
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.tripped {
            return Err(self.injected(key));
        }
        if let Some(remaining) = self.sets_before_failure {
            if remaining == 0 {
                self.tripped = true;
                return Err(self.injected(key));
            }
            self.sets_before_failure = Some(remaining - 1);
        }
        self.inner.set(key, value)?;
        self.sets += 1;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if self.tripped || self.failing_removes.contains(key) {
            return Err(self.injected(key));
        }
        self.inner.remove(key)
    }

    fn limits(&self) -> SubstrateLimits {
        self.inner.limits()
    }

    fn used_bytes(&self) -> Result<usize, StorageError> {
        self.inner.used_bytes()
    }
}

/// On-disk SQLite substrate in a temporary directory that lives as long as
/// this value.
pub struct TempSqlite {
    pub dir: TempDir,
    pub path: String,
}

impl TempSqlite {
    pub fn new() -> Result<Self, std::io::Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("planvault.db").to_string_lossy().into_owned();
        Ok(Self { dir, path })
    }

    pub fn open(&self, namespace: &str, limits: SubstrateLimits) -> Result<SqliteKv, StorageError> {
        SqliteKv::open(&self.path, namespace, limits)
    }
}
