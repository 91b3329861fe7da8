use tessera_core::TesseraError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClustererError {
    #[error("Sample set error: {0}")]
    SampleSet(String),

    #[error("Rule {rule} has an invalid timestamp: {value}")]
    CorruptRule { rule: String, value: String },

    #[error("Failed to dispatch clustering task: {0}")]
    Dispatch(String),

    #[error("Storage error: {0}")]
    Storage(#[from] TesseraError),
}

pub type Result<T> = std::result::Result<T, ClustererError>;
