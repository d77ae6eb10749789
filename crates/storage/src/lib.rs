pub mod chunked;
pub mod cipher;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use chunked::{ChunkConfig, ChunkMetadata, ChunkedStore, StorageStats};
pub use cipher::{Cipher, CipherConfig, Sealed};
pub use error::StorageError;
pub use memory::MemoryKv;
pub use sqlite::SqliteKv;
pub use traits::*;
