//! Dashboard error types.

use alloy::transports::{RpcError, TransportError};
use thiserror::Error;

pub type Result<T, E = DashboardError> = std::result::Result<T, E>;

/// Errors surfaced by the RPC client, contract handle and poller.
#[derive(Debug, Clone, Error)]
pub enum DashboardError {
    /// Transport failure or error response from the node.
    #[error("network error: {message}")]
    Network { message: String, recoverable: bool },

    /// Malformed ABI, address or settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Payload from the node that could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The refresh sink is already being driven by another poller.
    #[error("refresh sink is already driven by another poller")]
    AlreadyPolling,
}

impl DashboardError {
    pub fn network(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Network { message: message.into(), recoverable }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Whether retrying the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { recoverable: true, .. })
    }
}

impl From<TransportError> for DashboardError {
    fn from(err: TransportError) -> Self {
        match err {
            RpcError::SerError(e) => Self::parse(format!("failed to serialize request: {e}")),
            RpcError::DeserError { err, text } => {
                Self::parse(format!("failed to decode response `{text}`: {err}"))
            }
            RpcError::NullResp => Self::parse("node returned a null response"),
            RpcError::Transport(kind) => {
                let recoverable = kind.recoverable();
                Self::network(kind.to_string(), recoverable)
            }
            other => Self::network(other.to_string(), false),
        }
    }
}
