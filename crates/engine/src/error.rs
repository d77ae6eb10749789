use planvault_core::{Collection, CoreError, RecordId, ScenarioId};
use planvault_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("{collection} record not found: {id}")]
    EntityNotFound { collection: Collection, id: RecordId },

    #[error("scenario not found: {0}")]
    ScenarioNotFound(ScenarioId),

    #[error("configuration error: {0}")]
    Config(String),
}
