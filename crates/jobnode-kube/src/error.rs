//! Error types for the cluster executor.

use thiserror::Error;

/// Errors that can occur while talking to the cluster executor.
///
/// Only infrastructure failures live here. A job whose algorithm exits
/// non-zero is not an error at this layer; it shows up as a failed count
/// on the job.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor could not be reached.
    #[error("Executor unavailable: {0}")]
    Unavailable(String),

    /// Transport error from the HTTP client.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with an error status.
    #[error("Executor API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The addressed object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A response body could not be decoded.
    #[error("Failed to decode executor response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request did not complete in time.
    #[error("Timeout waiting for executor")]
    Timeout,

    /// Client configuration is unusable.
    #[error("Invalid executor configuration: {0}")]
    InvalidConfig(String),
}

impl ExecutorError {
    /// Returns true if repeating the call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::Decode(_) | Self::InvalidConfig(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExecutorError::Unavailable("refused".into()).is_transient());
        assert!(ExecutorError::Timeout.is_transient());
        assert!(ExecutorError::Api {
            status: 503,
            message: "etcd".into()
        }
        .is_transient());
        assert!(ExecutorError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(!ExecutorError::Api {
            status: 422,
            message: "invalid".into()
        }
        .is_transient());
        assert!(!ExecutorError::NotFound("pod".into()).is_transient());
    }
}
