//! Core domain errors.

use thiserror::Error;

/// Core domain errors for jobnode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier would produce a malformed resource name downstream.
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// A run asked for a dataset the node does not have.
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    pub(crate) fn invalid_identifier(value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
            reason,
        }
    }
}
