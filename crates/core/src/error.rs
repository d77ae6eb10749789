use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown field `{field}` for collection {collection}")]
    UnknownField { collection: String, field: String },

    #[error("duplicate record id {id} in collection {collection}")]
    DuplicateId { collection: String, id: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
