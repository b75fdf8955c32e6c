use thiserror::Error;

pub type SequenceResult<T> = Result<T, SequenceError>;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SequenceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SequenceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SequenceError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SequenceError::Validation(_))
    }
}

impl From<config::ConfigError> for SequenceError {
    fn from(err: config::ConfigError) -> Self {
        SequenceError::Config(err.to_string())
    }
}
