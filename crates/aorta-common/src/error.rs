use thiserror::Error;

/// Top-level error taxonomy shared by the buffer, router and publisher
/// crates. Each bounded context also defines its own narrower error enum
/// (`aorta-buffer::SpoolError`, `aorta-router::RuleError`, ...) and
/// converts into this one at its public boundary.
#[derive(Error, Debug)]
pub enum AortaError {
    /// I/O failure: disk full, permission denied, or corruption of the
    /// on-disk queue/delivery-record header.
    #[error("storage error: {0}")]
    Storage(String),

    /// `get(tag)` for a tag with no known record. Settlement handlers treat
    /// this as a no-op rather than propagating it.
    #[error("not found")]
    NotFound,

    /// A message failed `clean_properties`, or a rule file failed schema
    /// validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A peer attempted something this process disallows, e.g. opening a
    /// sender link from a non-upstream address.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Unrecoverable: spool lock not obtainable, spool directory missing
    /// and cannot be created. Callers exit non-zero at startup.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for AortaError {
    fn from(e: std::io::Error) -> Self {
        AortaError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AortaError>;
