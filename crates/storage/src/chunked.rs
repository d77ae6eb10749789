//! Chunked, encrypted storage of one logical value per key.
//!
//! Layout for a logical key `k`:
//! - `k_chunk_{n}`: sealed envelope of one plaintext slice, for `n` in
//!   `first_chunk..first_chunk + total_chunks`
//! - `k_metadata`: [`ChunkMetadata`] JSON, written after every chunk
//! - `k`: legacy single-entry value, migrated on first read
//!
//! A rewrite places its chunks after the range the current metadata points
//! at, so until the new metadata lands readers keep assembling the old
//! generation untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use planvault_core::clock::physical_now;

use crate::cipher::{Cipher, Sealed, sealed_text_len_bound};
use crate::error::StorageError;
use crate::traits::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Plaintext bytes per chunk.
    pub chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 128 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub key: String,
    pub total_chunks: u64,
    /// Sum of the plaintext lengths of all chunks.
    pub total_size: u64,
    /// BLAKE3 hex digest of the whole plaintext payload.
    pub checksum: String,
    pub created_at: i64,
    #[serde(default)]
    pub first_chunk: u64,
}

impl ChunkMetadata {
    fn chunk_range(&self) -> std::ops::Range<u64> {
        self.first_chunk..self.first_chunk + self.total_chunks
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub is_chunked: bool,
    pub chunk_count: u64,
    pub total_bytes: u64,
}

pub fn metadata_key(key: &str) -> String {
    format!("{key}_metadata")
}

pub fn chunk_key(key: &str, n: u64) -> String {
    format!("{key}_chunk_{n}")
}

pub struct ChunkedStore<K: KvStore> {
    kv: K,
    cipher: Cipher,
    config: ChunkConfig,
}

impl<K: KvStore> ChunkedStore<K> {
    pub fn new(kv: K, cipher: Cipher, config: ChunkConfig) -> Result<Self, StorageError> {
        if config.chunk_size == 0 {
            return Err(StorageError::InvalidConfig("chunk_size must be positive".into()));
        }
        let encoded = sealed_text_len_bound(config.chunk_size);
        let limit = kv.limits().max_entry_bytes;
        if encoded > limit {
            return Err(StorageError::InvalidConfig(format!(
                "chunk_size {} encodes to up to {encoded} bytes, substrate entry limit is {limit}",
                config.chunk_size
            )));
        }
        Ok(Self { kv, cipher, config })
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn kv_mut(&mut self) -> &mut K {
        &mut self.kv
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn write<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<ChunkMetadata, StorageError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.write_bytes(key, &payload)
    }

    pub fn read<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, StorageError> {
        match self.read_bytes(key)? {
            Some(payload) => serde_json::from_slice(&payload)
                .map(Some)
                .map_err(|e| StorageError::corrupted(key, format!("payload does not decode: {e}"))),
            None => Ok(None),
        }
    }

    /// Like [`read`](Self::read), but unreadable data yields `T::default()`.
    pub fn read_or_default<T: DeserializeOwned + Default>(&mut self, key: &str) -> T {
        match self.read(key) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(key, error = %e, "unreadable stored value, using default");
                T::default()
            }
        }
    }

    pub fn write_bytes(&mut self, key: &str, payload: &[u8]) -> Result<ChunkMetadata, StorageError> {
        let previous = match self.metadata(key) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(key, error = %e, "overwriting unreadable metadata");
                None
            }
        };
        let first_chunk = previous.as_ref().map(|m| m.chunk_range().end).unwrap_or(0);

        let slices: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(self.config.chunk_size).collect()
        };

        let mut written = Vec::with_capacity(slices.len());
        for (i, slice) in slices.iter().enumerate() {
            let name = chunk_key(key, first_chunk + i as u64);
            let result = self
                .cipher
                .encrypt(slice)
                .and_then(|sealed| sealed.to_text())
                .and_then(|text| self.kv.set(&name, &text));
            if let Err(e) = result {
                self.rollback(key, &written);
                return Err(e);
            }
            written.push(name);
        }

        let metadata = ChunkMetadata {
            key: key.to_string(),
            total_chunks: slices.len() as u64,
            total_size: payload.len() as u64,
            checksum: blake3::hash(payload).to_hex().to_string(),
            created_at: physical_now(),
            first_chunk,
        };
        let meta_text = serde_json::to_string(&metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()));
        if let Err(e) = meta_text.and_then(|text| self.kv.set(&metadata_key(key), &text)) {
            self.rollback(key, &written);
            return Err(e);
        }
        debug!(
            key,
            chunks = metadata.total_chunks,
            bytes = metadata.total_size,
            first_chunk,
            "committed chunked value"
        );

        // Committed; everything below only reclaims space.
        if let Some(previous) = previous {
            for n in previous.chunk_range() {
                self.remove_quietly(&chunk_key(key, n));
            }
        }
        self.sweep_orphans(key, metadata.chunk_range().end);
        if matches!(self.kv.get(key), Ok(Some(_))) {
            self.remove_quietly(key);
        }
        Ok(metadata)
    }

    pub fn read_bytes(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(metadata) = self.metadata(key)? {
            return self.assemble(&metadata).map(Some);
        }
        let Some(legacy) = self.kv.get(key)? else {
            return Ok(None);
        };
        let payload = self.decode_legacy(&legacy)?;
        info!(key, bytes = payload.len(), "migrating legacy single-entry value to chunks");
        if let Err(e) = self.write_bytes(key, &payload) {
            warn!(key, error = %e, "legacy migration failed, value stays in legacy form");
        }
        Ok(Some(payload))
    }

    /// Metadata goes first so readers stop seeing the value immediately.
    /// Once it is gone nothing points at the chunks any more, so every chunk
    /// removal is attempted even when one of them fails.
    pub fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let metadata = self.metadata(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "removing value with unreadable metadata");
            None
        });
        self.kv.remove(&metadata_key(key))?;
        let range = metadata.as_ref().map(ChunkMetadata::chunk_range).unwrap_or(0..0);
        for n in range.clone() {
            self.remove_quietly(&chunk_key(key, n));
        }
        self.sweep_orphans(key, range.end);
        self.remove_quietly(key);
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Result<Option<ChunkMetadata>, StorageError> {
        match self.kv.get(&metadata_key(key))? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StorageError::corrupted(key, format!("metadata: {e}"))),
            None => Ok(None),
        }
    }

    pub fn stats(&self, key: &str) -> Result<StorageStats, StorageError> {
        if let Some(meta) = self.metadata(key)? {
            return Ok(StorageStats {
                is_chunked: true,
                chunk_count: meta.total_chunks,
                total_bytes: meta.total_size,
            });
        }
        Ok(match self.kv.get(key)? {
            Some(legacy) => StorageStats {
                is_chunked: false,
                chunk_count: 0,
                total_bytes: legacy.len() as u64,
            },
            None => StorageStats::default(),
        })
    }

    fn assemble(&self, metadata: &ChunkMetadata) -> Result<Vec<u8>, StorageError> {
        let key = metadata.key.as_str();
        let mut payload = Vec::with_capacity(metadata.total_size as usize);
        for n in metadata.chunk_range() {
            let text = self
                .kv
                .get(&chunk_key(key, n))?
                .ok_or_else(|| StorageError::corrupted(key, format!("chunk {n} missing")))?;
            let sealed = Sealed::from_text(&text)
                .map_err(|e| StorageError::corrupted(key, format!("chunk {n}: {e}")))?;
            payload.extend_from_slice(&self.cipher.decrypt(&sealed)?);
        }
        if payload.len() as u64 != metadata.total_size {
            return Err(StorageError::corrupted(
                key,
                format!("assembled {} bytes, expected {}", payload.len(), metadata.total_size),
            ));
        }
        if blake3::hash(&payload).to_hex().as_str() != metadata.checksum {
            return Err(StorageError::corrupted(key, "checksum mismatch"));
        }
        Ok(payload)
    }

    /// Legacy values are either a sealed envelope or pre-encryption plaintext.
    fn decode_legacy(&self, text: &str) -> Result<Vec<u8>, StorageError> {
        match Sealed::from_text(text) {
            Ok(sealed) => self.cipher.decrypt(&sealed),
            Err(_) => Ok(text.as_bytes().to_vec()),
        }
    }

    fn rollback(&mut self, key: &str, written: &[String]) {
        warn!(key, chunks = written.len(), "write failed before commit, removing new chunks");
        for name in written {
            self.remove_quietly(name);
        }
    }

    /// Chunks past `start` belong to no committed generation.
    fn sweep_orphans(&mut self, key: &str, start: u64) {
        let mut n = start;
        while let Ok(Some(_)) = self.kv.get(&chunk_key(key, n)) {
            self.remove_quietly(&chunk_key(key, n));
            n += 1;
        }
    }

    fn remove_quietly(&mut self, name: &str) {
        if let Err(e) = self.kv.remove(name) {
            warn!(key = name, error = %e, "failed to remove stale entry");
        }
    }
}
