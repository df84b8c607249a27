//! Error types for the gridwalk environment abstraction.

use thiserror::Error;

/// Errors surfaced by remote-region and grid collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// Transport failure (connection reset, malformed response, ...)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Target region is unreachable (down, partitioned, unresolvable host)
    #[error("Region unreachable: {0}")]
    Unreachable(String),

    /// The remote region answered and refused the request
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(region: impl std::fmt::Display) -> Self {
        Self::Unreachable(region.to_string())
    }

    /// Creates a rejection carrying the remote region's reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// The human-readable reason behind the failure.
    pub fn reason(&self) -> String {
        match self {
            Self::Rejected(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}
