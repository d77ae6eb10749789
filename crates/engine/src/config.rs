use serde::Deserialize;
use std::path::Path;

use planvault_core::GuardLimits;
use planvault_storage::{ChunkConfig, CipherConfig, SubstrateLimits};

use crate::error::EngineError;

/// Every tunable of the data layer. Each section falls back to its defaults,
/// so an empty document is valid apart from the installation id the cipher
/// needs.
///
/// ```toml
/// [chunks]
/// chunk_size = 131072
///
/// [substrate]
/// capacity_bytes = 5242880
/// max_entry_bytes = 262144
///
/// [cipher]
/// installation_id = "3f1c..."
///
/// [guard]
/// max_depth = 32
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunks: ChunkConfig,
    pub substrate: SubstrateLimits,
    pub cipher: CipherConfig,
    pub guard: GuardLimits,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
