use aorta_common::error::AortaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("rule {index} in {path} is invalid: {reason}")]
    InvalidRule {
        path: String,
        index: usize,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl From<RuleError> for AortaError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::Io { path, source } => AortaError::Storage(format!("{path}: {source}")),
            RuleError::Parse { path, source } => AortaError::Validation(format!("{path}: {source}")),
            RuleError::InvalidRule { path, index, reason } => {
                AortaError::Validation(format!("rule {index} in {path}: {reason}"))
            }
        }
    }
}
