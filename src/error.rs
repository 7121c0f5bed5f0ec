use thiserror::Error;

/// Everything a `DokuwebClient` operation can fail with. No failure is
/// retried locally; each one is terminal for the call that raised it.
#[derive(Debug, Error)]
pub enum DokuwebError {
    /// Token fetch was rejected or failed on the wire.
    #[error("authentication failed: {status} {reason}")]
    Authentication { status: u16, reason: String },

    /// An operation was invoked before `authenticate()` produced a token.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// The remote service reported a non-success result for an operation.
    #[error("{operation} failed: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },

    /// Network failure or non-2xx HTTP status.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("{operation}: {message}")]
    Parse {
        operation: &'static str,
        message: String,
    },
}

impl DokuwebError {
    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            message: message.into(),
        }
    }

    pub fn parse(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            operation,
            message: message.into(),
        }
    }
}
