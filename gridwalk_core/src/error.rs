//! Failure taxonomy of the migration protocol.

use gridwalk_env::{AgentId, ObjectId, RegionHandle};
use thiserror::Error;

/// Errors raised while moving an agent or object between regions.
///
/// Everything up to and including `DestinationRejected` aborts before any
/// remote state changes. `HandoffFailed`, `Canceled` and `CallbackTimeout`
/// happen after the destination has been contacted and are followed by a
/// rollback. The two crossing failures are per-object and never abort the
/// migration they are part of.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransferError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    /// Final destination sits on the source's own grid coordinates
    #[error("Destination coincides with the source region")]
    InvalidSelfTarget,

    #[error("Destination unreachable: {0}")]
    DestinationUnreachable(String),

    #[error("Destination refused: {0}")]
    DestinationRejected(String),

    /// Destination accepted the circuit but refused the state snapshot
    #[error("Hand-off failed: {0}")]
    HandoffFailed(String),

    #[error("Agent never arrived at the destination")]
    CallbackTimeout,

    #[error("Migration canceled by user")]
    Canceled,

    /// A migration for this agent is already running
    #[error("Agent {0} is already in transit")]
    TransferInProgress(AgentId),

    #[error("Agent {0} has no presence in this region")]
    AgentNotFound(AgentId),

    #[error("Inconsistent attachment state")]
    InconsistentAttachments,

    #[error("Attachment {object} failed to cross into {destination}: {reason}")]
    AttachmentCrossingFailed {
        object: ObjectId,
        destination: RegionHandle,
        reason: String,
    },

    #[error("Object {object} failed to cross: {reason}")]
    ObjectCrossingFailed { object: ObjectId, reason: String },
}

impl TransferError {
    /// Status text shown to the viewer when a migration fails.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(reason) => reason.clone(),
            Self::DestinationNotFound(message) => message.clone(),
            Self::InvalidSelfTarget => {
                "Space warp! You would crash. Move to a different region and try again.".to_string()
            }
            Self::DestinationUnreachable(_) => "Remote Region appears to be down".to_string(),
            Self::DestinationRejected(reason) => format!("Destination refused: {}", reason),
            Self::HandoffFailed(_) | Self::CallbackTimeout => {
                "Problems connecting to destination.".to_string()
            }
            Self::Canceled => "You canceled the tp.".to_string(),
            Self::TransferInProgress(_) => "A teleport is already in progress.".to_string(),
            Self::AgentNotFound(_) => "Internal error".to_string(),
            Self::InconsistentAttachments => "Inconsistent attachment state".to_string(),
            Self::AttachmentCrossingFailed { .. } | Self::ObjectCrossingFailed { .. } => {
                "Internal error".to_string()
            }
        }
    }

    /// True when the failure happened before any remote state changed.
    pub fn is_pre_remote(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_)
                | Self::DestinationNotFound(_)
                | Self::InvalidSelfTarget
                | Self::DestinationUnreachable(_)
                | Self::DestinationRejected(_)
                | Self::TransferInProgress(_)
                | Self::AgentNotFound(_)
                | Self::InconsistentAttachments
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert_eq!(
            TransferError::DestinationRejected("full".to_string()).user_message(),
            "Destination refused: full"
        );
        assert_eq!(TransferError::Canceled.user_message(), "You canceled the tp.");
        assert_eq!(
            TransferError::CallbackTimeout.user_message(),
            "Problems connecting to destination."
        );
    }

    #[test]
    fn test_pre_remote_classification() {
        assert!(TransferError::InvalidSelfTarget.is_pre_remote());
        assert!(TransferError::DestinationRejected("x".into()).is_pre_remote());
        assert!(!TransferError::CallbackTimeout.is_pre_remote());
        assert!(!TransferError::HandoffFailed("x".into()).is_pre_remote());
    }
}
