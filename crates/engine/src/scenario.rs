use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use planvault_core::clock::physical_now;
use planvault_core::guard::{self, GuardLimits};
use planvault_core::{Modification, ScenarioId, Snapshot};
use planvault_storage::{ChunkedStore, KvStore, StorageError, StorageStats};

use crate::error::EngineError;

pub const INDEX_KEY: &str = "scenario_index";

pub fn scenario_key(id: ScenarioId) -> String {
    format!("scenario_{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMetadata {
    pub total_modifications: u64,
    pub last_access_date: i64,
    pub created_at: i64,
}

/// A named branch of the dataset: its own snapshot plus the ordered log of
/// modifications that produced it from the live state it was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: ScenarioId,
    pub name: String,
    pub snapshot: Snapshot,
    pub modifications: Vec<Modification>,
    pub metadata: ScenarioMetadata,
}

impl Scenario {
    pub fn record(&mut self, modification: Modification) {
        self.modifications.push(modification);
        self.metadata.total_modifications = self.modifications.len() as u64;
    }

    pub fn pop_modification(&mut self) -> Option<Modification> {
        let popped = self.modifications.pop();
        self.metadata.total_modifications = self.modifications.len() as u64;
        popped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub id: ScenarioId,
    pub name: String,
    pub created_at: i64,
}

/// Scenario lifecycle on top of a chunked store. Each scenario is one
/// logical value; a small index lists what exists.
pub struct ScenarioStore<K: KvStore> {
    store: ChunkedStore<K>,
}

impl<K: KvStore> ScenarioStore<K> {
    pub fn new(store: ChunkedStore<K>) -> Self {
        Self { store }
    }

    pub fn chunked(&self) -> &ChunkedStore<K> {
        &self.store
    }

    pub fn chunked_mut(&mut self) -> &mut ChunkedStore<K> {
        &mut self.store
    }

    /// Field values are bounded with `limits` before anything is written, so
    /// a stored scenario always decodes.
    pub fn create(
        &mut self,
        name: &str,
        mut live_snapshot: Snapshot,
        limits: &GuardLimits,
    ) -> Result<Scenario, EngineError> {
        guard::sanitize_snapshot(&mut live_snapshot, limits)?;
        let mut index = self.read_index()?;
        let id = loop {
            let candidate = ScenarioId::new();
            if !index.iter().any(|s| s.id == candidate) {
                break candidate;
            }
        };
        let now = physical_now();
        let scenario = Scenario {
            id,
            name: name.to_string(),
            snapshot: live_snapshot,
            modifications: Vec::new(),
            metadata: ScenarioMetadata {
                total_modifications: 0,
                last_access_date: now,
                created_at: now,
            },
        };
        self.store.write(&scenario_key(id), &scenario)?;
        index.push(ScenarioSummary {
            id,
            name: scenario.name.clone(),
            created_at: now,
        });
        if let Err(e) = self.store.write(INDEX_KEY, &index) {
            // Without an index entry the scenario would be unreachable.
            self.discard(id);
            return Err(e.into());
        }
        info!(scenario = %id, name, "created scenario");
        Ok(scenario)
    }

    /// An unreadable index lists as empty.
    pub fn list(&mut self) -> Vec<ScenarioSummary> {
        self.store.read_or_default(INDEX_KEY)
    }

    // Strict read for read-modify-write: a failed read must not become an
    // empty index that then overwrites the stored one.
    fn read_index(&mut self) -> Result<Vec<ScenarioSummary>, EngineError> {
        Ok(self
            .store
            .read::<Vec<ScenarioSummary>>(INDEX_KEY)?
            .unwrap_or_default())
    }

    /// Unreadable scenarios come back as `None`.
    pub fn load(&mut self, id: ScenarioId) -> Result<Option<Scenario>, EngineError> {
        match self.store.read::<Scenario>(&scenario_key(id)) {
            Ok(scenario) => Ok(scenario),
            Err(
                e @ (StorageError::CorruptedData { .. }
                | StorageError::Decryption
                | StorageError::Serialization(_)),
            ) => {
                warn!(scenario = %id, error = %e, "scenario unreadable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&mut self, scenario: &Scenario) -> Result<(), EngineError> {
        self.store.write(&scenario_key(scenario.id), scenario)?;
        Ok(())
    }

    pub fn delete(&mut self, id: ScenarioId) -> Result<bool, EngineError> {
        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|s| s.id != id);
        let existed = index.len() != before
            || self.store.stats(&scenario_key(id)).is_ok_and(|s| s.total_bytes > 0);
        if index.len() != before {
            self.store.write(INDEX_KEY, &index)?;
        }
        self.store.remove(&scenario_key(id))?;
        if existed {
            info!(scenario = %id, "deleted scenario");
        }
        Ok(existed)
    }

    pub fn touch(&mut self, id: ScenarioId) -> Result<Scenario, EngineError> {
        let mut scenario = self.load(id)?.ok_or(EngineError::ScenarioNotFound(id))?;
        scenario.metadata.last_access_date = physical_now();
        self.save(&scenario)?;
        Ok(scenario)
    }

    pub fn stats(&self, id: ScenarioId) -> Result<StorageStats, EngineError> {
        Ok(self.store.stats(&scenario_key(id))?)
    }

    fn discard(&mut self, id: ScenarioId) {
        if let Err(e) = self.store.remove(&scenario_key(id)) {
            warn!(scenario = %id, error = %e, "failed to discard unindexed scenario");
        }
    }
}
