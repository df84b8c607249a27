//! Remote collaborator contracts: region-to-region RPC and the grid directory.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{AgentId, RegionHandle, RegionId, RegionInfo};
use crate::wire::{AgentCircuit, AgentSnapshot, CreateObjectRequest, TeleportFlags};

/// Region-to-region simulation service.
///
/// # Implementations
///
/// - **Production**: HTTP calls against the destination's `/agent/` and
///   `/object/` endpoints
/// - **Simulation**: direct calls into in-memory regions with fault injection
///
/// # Call Flow
///
/// ```text
/// Source                      Network                    Destination
///   |-- create_agent(circuit) --->|------------------------->| child agent
///   |-- update_agent(snapshot) -->|------------------------->| full state
///   |                             |                          |
///   |<---------------- release (arrival callback) -----------|
/// ```
#[async_trait]
pub trait SimulationService: Send + Sync + 'static {
    /// Asks the destination to admit the agent described by `circuit`.
    ///
    /// # Returns
    /// * `Ok(())` - The destination accepted the circuit
    /// * `Err(EnvError::Rejected)` - Refused, with the destination's reason
    /// * `Err(EnvError::Unreachable)` - The destination could not be contacted
    async fn create_agent(
        &self,
        destination: &RegionInfo,
        circuit: &AgentCircuit,
        flags: TeleportFlags,
    ) -> Result<(), EnvError>;

    /// Pushes a full state snapshot of an agent the destination already knows.
    async fn update_agent(
        &self,
        destination: &RegionInfo,
        snapshot: &AgentSnapshot,
    ) -> Result<(), EnvError>;

    /// Asks the destination to create an object (free-standing or attachment).
    async fn create_object(
        &self,
        destination: &RegionInfo,
        request: CreateObjectRequest,
    ) -> Result<(), EnvError>;

    /// Asks the destination to drop its session for an agent.
    async fn close_agent(&self, destination: &RegionInfo, agent: AgentId) -> Result<(), EnvError>;
}

/// Grid directory of regions.
#[async_trait]
pub trait GridService: Send + Sync + 'static {
    /// Looks up the region whose origin is the handle's world position.
    async fn region_by_handle(&self, handle: RegionHandle) -> Option<RegionInfo>;

    /// Looks up a region by name (case-insensitive).
    async fn region_by_name(&self, name: &str) -> Option<RegionInfo>;

    /// Looks up a region by identity.
    async fn region_by_id(&self, id: RegionId) -> Option<RegionInfo>;

    /// Regions designated as fallback destinations, best first.
    async fn default_regions(&self) -> Vec<RegionInfo>;

    /// Regions whose origin lies inside the given world-space rectangle (meters).
    async fn region_range(&self, x_min: i64, x_max: i64, y_min: i64, y_max: i64) -> Vec<RegionInfo>;

    /// Regions adjacent to `region` by the grid's neighbor relationship.
    async fn neighbors(&self, region: &RegionInfo) -> Vec<RegionInfo>;

    /// Applies redirect rules to a resolved region.
    ///
    /// Returns `None` when the final destination is having problems.
    async fn final_destination(&self, region: &RegionInfo) -> Option<RegionInfo> {
        Some(region.clone())
    }
}
