//! Error types for the bountyindex pipeline.

use thiserror::Error;

/// Errors that can occur while syncing the projection.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Ledger RPC failure (timeout, connection drop, bad response).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Projection or checkpoint write/read failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A live subscription closed or failed.
    #[error("Subscription for source '{source_name}' failed: {reason}")]
    Subscription { source_name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error is a transient source error that may be
    /// retried without touching the checkpoint.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Subscription { .. })
    }
}

/// A failure to decode a single field (or a whole event) from its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing argument '{field}'")]
    MissingField { field: String },

    #[error("argument '{field}' has invalid value: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("argument '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: String },

    #[error("argument '{field}' is not valid JSON: {reason}")]
    InvalidJson { field: String, reason: String },

    #[error("ABI decode failed: {reason}")]
    Abi { reason: String },
}

impl DecodeError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
