use crate::TypeMismatch;
use tessera_core::TesseraError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Option already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Option key has max length of 128 characters: {0}")]
    NameTooLong(String),

    #[error("Option {0} must not default to None")]
    NoneType(String),

    #[error("{key}: {source}")]
    TypeMismatch {
        key: String,
        #[source]
        source: TypeMismatch,
    },

    #[error("{key} cannot be changed at runtime: {reason}")]
    ImmutabilityViolation { key: String, reason: &'static str },

    #[error("{0} is not allowed to be loaded from config")]
    StoreOnlyViolation(String),

    #[error("Store error: {0}")]
    Store(#[from] TesseraError),
}

pub type Result<T> = std::result::Result<T, OptionsError>;
