use crate::outcome::Failure;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No API credential was supplied to the process.
    #[error("missing API credential: set KB_API_KEY or pass --api-key")]
    MissingCredential,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server was unreachable or rejected the handshake.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("session is already initialized")]
    AlreadyInitialized,

    #[error("session is not initialized")]
    NotInitialized,

    #[error("session is closed")]
    SessionClosed,

    #[error("arguments for {0} must be a JSON object")]
    InvalidArguments(String),

    /// The server reported a failure for a call that was expected to succeed.
    #[error("{operation} failed: {failure}")]
    Call { operation: String, failure: Failure },

    /// A call that was expected to fail returned a payload instead.
    #[error("{operation} unexpectedly succeeded with {payload}")]
    UnexpectedSuccess { operation: String, payload: Value },

    /// An outcome did not satisfy the checked contract.
    #[error("check failed: {0}")]
    Check(String),

    /// The probed feature is absent from this deployment.
    #[error("feature unavailable: {0}")]
    Unavailable(String),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to access file system: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The server-side failure behind this error, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::Call { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
