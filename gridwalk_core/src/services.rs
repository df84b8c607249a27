//! Local collaborator contracts consumed by the migration protocol.
//!
//! Remote collaborators (`SimulationService`, `GridService`) live in
//! `gridwalk_env`; the ones here are owned by the hosting region process:
//! its scene graph, the connected viewer, the viewer's event queue, the
//! capability layer and the user directory.

use crate::session::AgentSession;
use async_trait::async_trait;
use gridwalk_env::{
    AgentId, CrossRegion, GridService, ObjectId, Position, RegionHandle, RegionId, RegionInfo,
    SceneObject, SimulationService, TeleportFinish, TeleportFlags,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Synchronous messages to a connected viewer.
pub trait ViewerClient: Send + Sync {
    fn send_teleport_failed(&self, reason: &str);

    fn send_teleport_start(&self, flags: TeleportFlags);

    fn send_teleport_progress(&self, flags: TeleportFlags, message: &str);

    fn send_local_teleport(&self, position: Position, look_at: Position, flags: TeleportFlags);

    /// Fallback for `EventQueue::teleport_finish`.
    fn send_region_teleport(&self, finish: &TeleportFinish);

    /// Fallback for `EventQueue::cross_region`.
    fn send_cross_region(&self, cross: &CrossRegion);

    /// Fallback for EnableSimulator + EstablishAgentCommunication.
    fn inform_client_of_neighbor(&self, region: RegionHandle, endpoint: SocketAddr);

    /// Re-sends other agents' avatar data and appearance after a crossing.
    fn refresh_others(&self) {}
}

/// Asynchronous push channel to a viewer (optional per region).
pub trait EventQueue: Send + Sync {
    fn enable_simulator(
        &self,
        agent: AgentId,
        region: RegionHandle,
        endpoint: SocketAddr,
        source: RegionHandle,
    );

    fn establish_agent_communication(
        &self,
        agent: AgentId,
        region: RegionHandle,
        endpoint: SocketAddr,
        seed_url: &str,
        source: RegionHandle,
    );

    fn cross_region(&self, message: CrossRegion);

    fn teleport_finish(&self, message: TeleportFinish);
}

/// Per-agent capability seed bookkeeping.
///
/// The seed map doubles as the record of which regions hold a child agent:
/// its keys are the previous neighbor set the NeighborNotifier diffs against.
pub trait CapabilityModule: Send + Sync {
    fn child_seed(&self, agent: AgentId, region: RegionHandle) -> Option<String>;

    fn set_children_seeds(&self, agent: AgentId, seeds: BTreeMap<RegionHandle, String>);

    fn children_seeds(&self, agent: AgentId) -> BTreeMap<RegionHandle, String>;
}

/// Stored home location of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeLocation {
    pub region: RegionId,
    pub position: Position,
    pub look_at: Position,
}

/// Grid user directory.
#[async_trait]
pub trait HomeDirectory: Send + Sync {
    async fn home_location(&self, agent: AgentId) -> Option<HomeLocation>;
}

/// The hosting region's scene graph, as seen by the protocol.
pub trait Scene: Send + Sync {
    /// Directory entry of the hosting region.
    fn region(&self) -> RegionInfo;

    /// Live presence (root or child) of an agent.
    fn presence(&self, agent: AgentId) -> Option<Arc<AgentSession>>;

    /// Terrain height at a region-local X/Y.
    fn terrain_height(&self, x: f32, y: f32) -> f32;

    /// Teleport permission check; may adjust the requested position.
    fn can_teleport(&self, agent: AgentId, position: Position) -> Result<Position, String>;

    /// Tells every viewer in the region to forget these objects.
    fn broadcast_kill(&self, objects: &[ObjectId]);

    /// Tells every viewer in the region to forget an avatar.
    fn broadcast_kill_avatar(&self, agent: AgentId);

    fn object(&self, id: ObjectId) -> Option<SceneObject>;

    fn set_object_position(&self, id: ObjectId, position: Position);

    /// Removes an object from the scene and from storage.
    fn delete_object(&self, id: ObjectId) -> bool;

    /// Returns an object to its owner's inventory.
    fn return_object(&self, id: ObjectId) -> bool;

    /// Flags the object's physical actor after a failed crossing.
    fn mark_crossing_failed(&self, id: ObjectId);

    fn schedule_full_update(&self, id: ObjectId);

    /// Drops the presence entirely (the region forgets the agent).
    fn close_presence(&self, agent: AgentId);

    /// Deletes attachments whose wearer has left.
    fn cleanup_dropped_attachments(&self) {}
}

/// Collaborators injected into a TransferCoordinator at construction.
#[derive(Clone)]
pub struct TransferServices {
    pub grid: Arc<dyn GridService>,
    pub simulation: Arc<dyn SimulationService>,

    /// `None` when viewers of this region have no event queue
    pub event_queue: Option<Arc<dyn EventQueue>>,

    pub capabilities: Arc<dyn CapabilityModule>,
    pub homes: Arc<dyn HomeDirectory>,
}
