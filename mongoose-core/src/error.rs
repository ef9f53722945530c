use thiserror::Error;

use crate::retry::ErrorKind;

/// Crate-wide error type. Kinds mirror the taxonomy in the dispatch fabric's
/// error-handling design: configuration failures surface at registration,
/// pool-state violations surface at the call site that misused a tracker,
/// and fatal errors are reserved for the agent duty-cycle's uncaught path.
#[derive(Error, Debug)]
pub enum MongooseError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("null argument: {what}")]
    NullArgument { what: &'static str },

    #[error("duplicate target queue: {0}")]
    DuplicateTarget(String),

    #[error("no source registered for: {0}")]
    NoSource(String),

    #[error("invalid pool tracker state: {0}")]
    InvalidState(&'static str),

    #[error("target queue full after slow-consumer strategy exhausted: {0}")]
    QueueFull(String),

    #[error("fatal error on agent '{agent}': {message}")]
    Fatal { agent: String, message: String },

    #[error("{0}")]
    Processing(String),
}

pub type Result<T> = std::result::Result<T, MongooseError>;

impl MongooseError {
    /// Classifies this error for the retry policy. A processor's own
    /// `Processing` errors are presumed transient (the common case of "this
    /// attempt failed, the next one might not"); every other kind reflects
    /// a configuration or state problem that retrying cannot fix.
    pub fn retry_kind(&self) -> ErrorKind {
        match self {
            MongooseError::Processing(_) => ErrorKind::Transient,
            MongooseError::QueueFull(_) => ErrorKind::ResourceExhausted,
            _ => ErrorKind::Permanent,
        }
    }
}
