use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Correlation id already audited: {0}")]
    DuplicateCorrelation(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StateStoreError>;

impl From<StateStoreError> for op_core::Error {
    fn from(err: StateStoreError) -> Self {
        match err {
            StateStoreError::NotFound(id) => op_core::Error::not_found(format!("session '{}'", id)),
            other => op_core::Error::store(other.to_string()),
        }
    }
}
