//! Error type of the simulation harness.

use gridwalk_core::TransferError;
use gridwalk_env::{AgentId, RegionHandle};
use thiserror::Error;

/// Failures while driving a scenario.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("Unknown region: {0}")]
    UnknownRegion(RegionHandle),

    #[error("Agent {0} has no root presence anywhere")]
    NoRootPresence(AgentId),

    #[error("Agent {0} has no connected viewer")]
    NoViewer(AgentId),

    /// A protocol call failed where the scenario expected success
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// A scenario expectation did not hold
    #[error("{0}")]
    Check(String),
}

impl SimError {
    pub fn check(msg: impl Into<String>) -> Self {
        Self::Check(msg.into())
    }
}

/// Turns a false condition into a `SimError::Check`.
pub fn ensure(condition: bool, msg: impl Into<String>) -> Result<(), SimError> {
    if condition {
        Ok(())
    } else {
        Err(SimError::check(msg))
    }
}
