use thiserror::Error;

use crate::common::error::ExAllocError::GenericError;

#[derive(Debug, Error)]
pub enum ExAllocError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<anyhow::Error> for ExAllocError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for ExAllocError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn config_error<T>(message: String) -> crate::Result<T> {
    Err(ExAllocError::ConfigError(message))
}
