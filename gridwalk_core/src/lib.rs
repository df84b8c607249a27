//! gridwalk Core - Agent Migration Protocol for partitioned virtual worlds
//!
//! Moves an avatar's authority between independently hosted regions while
//! keeping at most one region root for it at a time:
//! 1. **Hand-off**: create-remote, update-remote, notify-viewer, wait for
//!    the arrival callback, then finalize or roll back
//! 2. **Shadow visibility**: child agents in every neighbor, diffed against
//!    the agent's capability seeds
//! 3. **Dependent objects**: attachments travel with their wearer, loose
//!    objects cross borders on their own

pub mod attachments;
pub mod config;
pub mod coordinator;
pub mod crossing;
pub mod destination;
pub mod error;
pub mod handoff;
pub mod neighbors;
pub mod services;
pub mod session;
pub mod transit;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use attachments::{AttachmentMigrator, AttachmentReport};
pub use config::TransferConfig;
pub use coordinator::{TeleportOutcome, TransferCoordinator, TransferHandle};
pub use crossing::{CrossingOutcome, ObjectCrossing};
pub use destination::{BorderCrossing, Destination, DestinationNegotiator, TargetRef};
pub use error::TransferError;
pub use handoff::{
    DefaultHandoffStrategy, HandoffExecutor, HandoffKind, HandoffOutcome, HandoffReport,
    HandoffState, HandoffStrategy,
};
pub use neighbors::{NeighborNotifier, NeighborUpdate};
pub use services::{
    CapabilityModule, EventQueue, HomeDirectory, HomeLocation, Scene, TransferServices,
    ViewerClient,
};
pub use session::{AgentSession, SessionState};
pub use transit::{ArrivalOutcome, PendingTransfer, TransitGuard, TransitTracker};
