//! Error types for the CLI client.

use thiserror::Error;

/// Errors that can occur when talking to a node.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node answered with an error status.
    #[error("node returned {status}: {message}")]
    Node { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
