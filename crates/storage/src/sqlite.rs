use rusqlite::{Connection, OptionalExtension};

use crate::error::StorageError;
use crate::traits::{KvStore, SubstrateLimits};

/// Durable substrate: one SQLite table, rows scoped by namespace so several
/// origins can share a database file without seeing each other's keys.
pub struct SqliteKv {
    conn: Connection,
    namespace: String,
    limits: SubstrateLimits,
}

impl SqliteKv {
    pub fn open(path: &str, namespace: &str, limits: SubstrateLimits) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            limits,
        })
    }

    pub fn open_in_memory(namespace: &str, limits: SubstrateLimits) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            limits,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn used_excluding(&self, key: &str) -> Result<usize, StorageError> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) FROM kv_entries WHERE namespace = ?1 AND key != ?2",
            rusqlite::params![self.namespace, key],
            |row| row.get(0),
        )?;
        Ok(used as usize)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![self.namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let used = self.used_excluding(key)?;
        self.limits.check(key, value.len(), used)?;
        self.conn.execute(
            "INSERT INTO kv_entries (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![self.namespace, key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2",
            rusqlite::params![self.namespace, key],
        )?;
        Ok(())
    }

    fn limits(&self) -> SubstrateLimits {
        self.limits
    }

    fn used_bytes(&self) -> Result<usize, StorageError> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) FROM kv_entries WHERE namespace = ?1",
            rusqlite::params![self.namespace],
            |row| row.get(0),
        )?;
        Ok(used as usize)
    }
}
