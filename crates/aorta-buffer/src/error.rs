use aorta_common::error::AortaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("could not acquire exclusive lock on spool directory {0}")]
    Locked(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

impl From<SpoolError> for AortaError {
    fn from(e: SpoolError) -> Self {
        match e {
            SpoolError::Io(err) => AortaError::Storage(err.to_string()),
            SpoolError::Encode(msg) => AortaError::Storage(msg),
            SpoolError::Decode(msg) => AortaError::Storage(msg),
            SpoolError::Locked(path) => AortaError::Fatal(format!("could not lock spool directory {path}")),
        }
    }
}
