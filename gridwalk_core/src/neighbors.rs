//! NeighborNotifier - keeps child agents alive around an agent's region.
//!
//! The previous neighbor set is the key set of the agent's capability
//! seeds. Every call diffs the current neighborhood against it, records
//! the new seed map, then fans out one task per neighbor.

use crate::config::TransferConfig;
use crate::services::{EventQueue, TransferServices};
use crate::session::AgentSession;
use gridwalk_env::{
    AgentCircuit, GridContext, RegionHandle, RegionInfo, SimulationService, TeleportFlags,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one neighbor synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborUpdate {
    /// Regions newly holding a child agent
    pub added: Vec<RegionHandle>,

    /// Regions dropped from local tracking
    pub stale: Vec<RegionHandle>,

    /// Neighbors a notification task was spawned for
    pub informed: Vec<RegionHandle>,
}

pub struct NeighborNotifier<C: GridContext> {
    ctx: Arc<C>,
    services: TransferServices,
    config: TransferConfig,
}

impl<C: GridContext> NeighborNotifier<C> {
    pub fn new(ctx: Arc<C>, services: TransferServices, config: TransferConfig) -> Self {
        Self {
            ctx,
            services,
            config,
        }
    }

    /// Regions that should hold a child copy of an agent in `region`.
    ///
    /// With variable sight the draw distance spans a bounding box around the
    /// region (never less than one region wide); otherwise the grid's
    /// adjacency decides.
    pub async fn neighbor_regions(&self, region: &RegionInfo, draw_distance: f32) -> Vec<RegionInfo> {
        let mut regions = if self.config.variable_region_sight && draw_distance > 0.0 {
            let reach = (draw_distance as i64).max(region.size as i64);
            let x = region.world_x() as i64;
            let y = region.world_y() as i64;
            let size = region.size as i64;
            self.services
                .grid
                .region_range(x - reach, x + size + reach - 1, y - reach, y + size + reach - 1)
                .await
        } else {
            self.services.grid.neighbors(region).await
        };

        regions.retain(|r| r.handle() != region.handle());
        regions
    }

    /// Re-synchronizes child agents around `region` for a root session.
    pub async fn enable_child_agents(
        &self,
        session: &Arc<AgentSession>,
        region: &RegionInfo,
    ) -> NeighborUpdate {
        let agent = session.agent_id();
        let own = region.handle();
        let neighbors = self.neighbor_regions(region, session.draw_distance()).await;

        let previous: BTreeSet<RegionHandle> = self
            .services
            .capabilities
            .children_seeds(agent)
            .into_keys()
            .collect();
        let mut current: BTreeSet<RegionHandle> = neighbors.iter().map(|r| r.handle()).collect();
        current.insert(own);

        let added: Vec<RegionHandle> = current.difference(&previous).copied().collect();
        let stale: Vec<RegionHandle> = previous.difference(&current).copied().collect();

        let mut seeds = self.services.capabilities.children_seeds(agent);
        for handle in &stale {
            seeds.remove(handle);
        }
        if !stale.is_empty() {
            debug!(agent = %agent, count = stale.len(), "Dropping stale neighbors");
            session.drop_old_neighbors(&stale);
        }
        seeds.insert(own, session.caps_path().to_string());

        let mut circuits = Vec::with_capacity(neighbors.len());
        for neighbor in &neighbors {
            let handle = neighbor.handle();
            let is_new = added.contains(&handle);
            let caps_path = match seeds.get(&handle) {
                Some(seed) if !is_new => seed.clone(),
                _ => self.ctx.random_caps_path(),
            };
            seeds.insert(handle, caps_path.clone());
            circuits.push((neighbor.clone(), session.circuit_for(self.config.child_start_position(), caps_path), is_new));
        }

        // Seeds are recorded before any region is announced to the viewer
        self.services.capabilities.set_children_seeds(agent, seeds.clone());
        for handle in seeds.keys() {
            session.add_known_region(*handle);
        }

        let mut informed = Vec::with_capacity(circuits.len());
        for (neighbor, mut circuit, is_new) in circuits {
            circuit.children_seeds = seeds.clone();
            informed.push(neighbor.handle());
            self.spawn_inform(session.clone(), region.handle(), neighbor, circuit, is_new);
        }

        info!(
            agent = %agent,
            region = %region.name,
            added = added.len(),
            stale = stale.len(),
            "Child agents synchronized"
        );

        NeighborUpdate {
            added,
            stale,
            informed,
        }
    }

    /// Opens a child agent in a single region.
    pub async fn enable_child_agent(&self, session: &Arc<AgentSession>, source: &RegionInfo, region: RegionInfo) {
        let agent = session.agent_id();
        let handle = region.handle();
        let mut seeds = self.services.capabilities.children_seeds(agent);

        let caps_path = match seeds.get(&handle) {
            Some(seed) => seed.clone(),
            None => self.ctx.random_caps_path(),
        };
        seeds.insert(handle, caps_path.clone());
        self.services.capabilities.set_children_seeds(agent, seeds.clone());
        session.add_known_region(handle);

        let mut circuit = session.circuit_for(self.config.child_start_position(), caps_path);
        circuit.children_seeds = seeds;
        self.spawn_inform(session.clone(), source.handle(), region, circuit, true);
    }

    fn spawn_inform(
        &self,
        session: Arc<AgentSession>,
        source: RegionHandle,
        neighbor: RegionInfo,
        circuit: AgentCircuit,
        is_new: bool,
    ) {
        let task = InformTask {
            ctx: self.ctx.clone(),
            simulation: self.services.simulation.clone(),
            event_queue: self.services.event_queue.clone(),
            inform_delay: self.config.neighbor_inform_delay(),
            enable_delay: self.config.enable_simulator_delay(),
        };
        self.ctx.spawn("inform-neighbor", async move {
            task.run(session, source, neighbor, circuit, is_new).await;
        });
    }
}

struct InformTask<C: GridContext> {
    ctx: Arc<C>,
    simulation: Arc<dyn SimulationService>,
    event_queue: Option<Arc<dyn EventQueue>>,
    inform_delay: Duration,
    enable_delay: Duration,
}

impl<C: GridContext> InformTask<C> {
    async fn run(
        self,
        session: Arc<AgentSession>,
        source: RegionHandle,
        neighbor: RegionInfo,
        circuit: AgentCircuit,
        is_new: bool,
    ) {
        let agent = session.agent_id();
        let handle = neighbor.handle();

        // Let closures from a previous hand-off settle first
        self.ctx.sleep(self.inform_delay).await;

        if let Err(e) = self
            .simulation
            .create_agent(&neighbor, &circuit, TeleportFlags::DEFAULT)
            .await
        {
            warn!(agent = %agent, region = %handle, error = %e, "Failed to inform neighbor");
            return;
        }

        if !is_new {
            debug!(agent = %agent, region = %handle, "Refreshed child agent");
            return;
        }

        let Some(endpoint) = neighbor.endpoint else {
            warn!(agent = %agent, region = %handle, "Neighbor has no endpoint; viewer not told");
            return;
        };

        match &self.event_queue {
            Some(queue) => {
                queue.enable_simulator(agent, handle, endpoint, source);
                self.ctx.sleep(self.enable_delay).await;
                let seed_url = neighbor.caps_seed_url(&circuit.caps_path);
                queue.establish_agent_communication(agent, handle, endpoint, &seed_url, source);
            }
            None => session.client().inform_client_of_neighbor(handle, endpoint),
        }

        debug!(agent = %agent, region = %handle, "Child agent established");
    }
}
