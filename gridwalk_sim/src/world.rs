//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::error::SimError;
use crate::ids::DeterministicIds;
use crate::network::SimNetwork;
use crate::region::{RegionHost, SimRegion};
use crate::viewer::{SimEventQueue, SimViewer};
use async_trait::async_trait;
use gridwalk_core::{
    AgentSession, CapabilityModule, EventQueue, HomeDirectory, HomeLocation, NeighborUpdate, Scene,
    TransferConfig, TransferCoordinator, TransferServices,
};
use gridwalk_env::{
    AgentCircuit, AgentId, AvatarAppearance, EdgeBehavior, GridContext, GridService, ObjectId,
    Position, RegionHandle, RegionId, RegionInfo, SceneObject, SessionId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Regions per row of the contiguous block
    pub grid_width: u32,

    /// Rows of the contiguous block
    pub grid_height: u32,

    /// Grid coordinates of the block's south-west corner
    pub origin: (u32, u32),

    /// How long a viewer takes to reach the destination it was sent to
    pub confirmation_delay_ms: u64,

    /// Regions push to viewers through an event queue (otherwise the
    /// synchronous viewer fallbacks are used)
    pub event_queue: bool,

    /// Flat terrain height of every region (meters)
    pub terrain_height: f32,

    /// Protocol tunables shared by every region
    pub transfer: TransferConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            grid_width: 3,
            grid_height: 3,
            origin: (1000, 1000),
            confirmation_delay_ms: 1_000,
            event_queue: true,
            terrain_height: 21.0,
            transfer: TransferConfig::default(),
        }
    }
}

/// In-memory grid directory.
pub struct SimGrid {
    regions: Vec<RegionInfo>,
    defaults: Vec<RegionInfo>,
}

impl SimGrid {
    pub fn new(regions: Vec<RegionInfo>, defaults: Vec<RegionInfo>) -> Self {
        Self { regions, defaults }
    }

    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }
}

#[async_trait]
impl GridService for SimGrid {
    async fn region_by_handle(&self, handle: RegionHandle) -> Option<RegionInfo> {
        self.regions.iter().find(|r| r.handle() == handle).cloned()
    }

    async fn region_by_name(&self, name: &str) -> Option<RegionInfo> {
        self.regions.iter().find(|r| r.name.eq_ignore_ascii_case(name)).cloned()
    }

    async fn region_by_id(&self, id: RegionId) -> Option<RegionInfo> {
        self.regions.iter().find(|r| r.id == id).cloned()
    }

    async fn default_regions(&self) -> Vec<RegionInfo> {
        self.defaults.clone()
    }

    async fn region_range(&self, x_min: i64, x_max: i64, y_min: i64, y_max: i64) -> Vec<RegionInfo> {
        self.regions
            .iter()
            .filter(|r| {
                let (x, y) = (r.world_x() as i64, r.world_y() as i64);
                x >= x_min && x <= x_max && y >= y_min && y <= y_max
            })
            .cloned()
            .collect()
    }

    async fn neighbors(&self, region: &RegionInfo) -> Vec<RegionInfo> {
        self.regions
            .iter()
            .filter(|r| {
                let dx = (r.grid_x as i64 - region.grid_x as i64).abs();
                let dy = (r.grid_y as i64 - region.grid_y as i64).abs();
                dx <= 1 && dy <= 1 && r.id != region.id
            })
            .cloned()
            .collect()
    }
}

/// Capability seeds of every agent, shared by all regions of the grid.
#[derive(Default)]
pub struct SimCapabilities {
    seeds: Mutex<HashMap<AgentId, BTreeMap<RegionHandle, String>>>,
}

impl CapabilityModule for SimCapabilities {
    fn child_seed(&self, agent: AgentId, region: RegionHandle) -> Option<String> {
        self.seeds.lock().get(&agent).and_then(|s| s.get(&region).cloned())
    }

    fn set_children_seeds(&self, agent: AgentId, seeds: BTreeMap<RegionHandle, String>) {
        self.seeds.lock().insert(agent, seeds);
    }

    fn children_seeds(&self, agent: AgentId) -> BTreeMap<RegionHandle, String> {
        self.seeds.lock().get(&agent).cloned().unwrap_or_default()
    }
}

/// Recorded home locations.
#[derive(Default)]
pub struct SimHomes {
    homes: Mutex<HashMap<AgentId, HomeLocation>>,
}

impl SimHomes {
    pub fn set_home(&self, agent: AgentId, home: HomeLocation) {
        self.homes.lock().insert(agent, home);
    }
}

#[async_trait]
impl HomeDirectory for SimHomes {
    async fn home_location(&self, agent: AgentId) -> Option<HomeLocation> {
        self.homes.lock().get(&agent).cloned()
    }
}

/// The SimWorld - container for the entire simulation.
///
/// A `grid_width` x `grid_height` block of contiguous regions plus one
/// isolated "Island" region far to the east, which is also the grid's
/// default region. Every region runs its own TransferCoordinator against
/// the shared simulated network.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (paused clock, seeded RNG)
    pub context: Arc<SimContext>,

    pub ids: DeterministicIds,
    pub network: Arc<SimNetwork>,
    pub grid: Arc<SimGrid>,
    pub capabilities: Arc<SimCapabilities>,
    pub homes: Arc<SimHomes>,

    /// Next free object index
    next_object: Mutex<u64>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    ///
    /// Must run inside the paused simulation runtime.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let id_seed = config.seed.wrapping_mul(0x517cc1b727220a95);

        let context = SimContext::shared(context_seed);
        let ids = DeterministicIds::new(id_seed);
        let network = Arc::new(SimNetwork::new(context.clone()));

        let size = config.transfer.region_size;
        let (ox, oy) = config.origin;
        let mut regions = Vec::new();
        for dy in 0..config.grid_height {
            for dx in 0..config.grid_width {
                let index = regions.len() as u64;
                regions.push(Self::region_info(
                    ids.region(index),
                    format!("R{}{}", dx, dy),
                    (ox + dx, oy + dy),
                    size,
                    [10, 0, dx as u8, dy as u8],
                ));
            }
        }
        let island = Self::region_info(
            ids.region(regions.len() as u64),
            "Island".to_string(),
            (ox + config.grid_width + 8, oy),
            size,
            [10, 1, 0, 1],
        );
        regions.push(island.clone());

        let grid = Arc::new(SimGrid::new(regions.clone(), vec![island]));
        let capabilities = Arc::new(SimCapabilities::default());
        let homes = Arc::new(SimHomes::default());

        for info in regions {
            let region = Arc::new(SimRegion::new(info, config.terrain_height));
            let event_queue = config
                .event_queue
                .then(|| Arc::new(SimEventQueue::new(Arc::downgrade(&network))) as Arc<dyn EventQueue>);
            let services = TransferServices {
                grid: grid.clone(),
                simulation: network.clone(),
                event_queue,
                capabilities: capabilities.clone(),
                homes: homes.clone(),
            };
            let scene: Arc<dyn Scene> = region.clone();
            let coordinator = TransferCoordinator::new(context.clone(), scene, services, config.transfer.clone());
            network.add_host(Arc::new(RegionHost { region, coordinator }));
        }

        info!(seed = config.seed, regions = grid.regions().len(), "Simulated grid ready");

        Self {
            config,
            context,
            ids,
            network,
            grid,
            capabilities,
            homes,
            next_object: Mutex::new(0),
        }
    }

    fn region_info(id: RegionId, name: String, grid: (u32, u32), size: u32, ip: [u8; 4]) -> RegionInfo {
        RegionInfo {
            id,
            external_host: format!("{}.sim", name.to_lowercase()),
            name,
            grid_x: grid.0,
            grid_y: grid.1,
            size,
            http_port: 9000,
            endpoint: Some(SocketAddr::from((ip, 9000))),
        }
    }

    /// Handle of the block region at offset (dx, dy) from the origin.
    pub fn block_region(&self, dx: u32, dy: u32) -> RegionHandle {
        let (ox, oy) = self.config.origin;
        RegionHandle::from_grid(ox + dx, oy + dy, self.config.transfer.region_size)
    }

    /// Middle of the block.
    pub fn center(&self) -> RegionHandle {
        self.block_region(self.config.grid_width / 2, self.config.grid_height / 2)
    }

    /// The isolated default region.
    pub fn island(&self) -> RegionHandle {
        let (ox, oy) = self.config.origin;
        RegionHandle::from_grid(ox + self.config.grid_width + 8, oy, self.config.transfer.region_size)
    }

    pub fn host(&self, region: RegionHandle) -> Result<Arc<RegionHost>, SimError> {
        self.network.host(region).ok_or(SimError::UnknownRegion(region))
    }

    pub fn viewer(&self, agent: AgentId) -> Result<Arc<SimViewer>, SimError> {
        self.network.viewer(agent).ok_or(SimError::NoViewer(agent))
    }

    /// The region currently authoritative for an agent.
    pub fn root_host(&self, agent: AgentId) -> Result<Arc<RegionHost>, SimError> {
        self.network
            .hosts()
            .into_iter()
            .find(|h| h.region.presence(agent).map_or(false, |p| !p.is_child()))
            .ok_or(SimError::NoRootPresence(agent))
    }

    pub fn root_session(&self, agent: AgentId) -> Result<Arc<AgentSession>, SimError> {
        self.root_host(agent)?
            .region
            .presence(agent)
            .ok_or(SimError::NoRootPresence(agent))
    }

    /// Logs a new agent into a region as root.
    pub fn login(&self, index: u64, region: RegionHandle, position: Position) -> Result<AgentId, SimError> {
        let host = self.host(region)?;
        let agent = self.ids.agent(index);
        let viewer = Arc::new(SimViewer::new(
            agent,
            self.context.clone(),
            Arc::downgrade(&self.network),
            Duration::from_millis(self.config.confirmation_delay_ms),
        ));
        self.network.add_viewer(viewer.clone());

        let circuit = AgentCircuit {
            agent_id: agent,
            session_id: SessionId::from_seed(index),
            circuit_code: 1000 + index as u32,
            first_name: "Sim".to_string(),
            last_name: format!("Resident{}", index),
            start_position: position,
            child: false,
            appearance: AvatarAppearance::default(),
            caps_path: self.context.random_caps_path(),
            children_seeds: BTreeMap::new(),
            service_urls: HashMap::new(),
            ip_address: "127.0.0.1".to_string(),
            viewer: "gridwalk-sim".to_string(),
            channel: "sim".to_string(),
            mac: String::new(),
            id0: String::new(),
        };
        host.region.insert_presence(Arc::new(AgentSession::new(circuit, viewer)));
        info!(agent = %agent, region = %host.region.info().name, "Agent logged in");
        Ok(agent)
    }

    /// Opens child agents around the agent's root region.
    pub async fn open_neighbors(&self, agent: AgentId) -> Result<NeighborUpdate, SimError> {
        let host = self.root_host(agent)?;
        Ok(host.coordinator.enable_child_agents(agent).await?)
    }

    fn next_object_index(&self) -> u64 {
        let mut next = self.next_object.lock();
        *next += 1;
        *next
    }

    /// Makes an agent wear a new attachment rezzed from its inventory.
    pub fn wear(&self, agent: AgentId) -> Result<ObjectId, SimError> {
        let host = self.root_host(agent)?;
        let session = self.root_session(agent)?;
        let index = self.next_object_index();
        let item = self.ids.item(index);
        let object = SceneObject {
            id: self.ids.object(index),
            name: format!("attachment-{}", index),
            owner_id: agent,
            position: session.position(),
            attached_position: Position::new(0.0, 0.0, 0.1),
            attach_point: 1 + (index % 30) as u8,
            from_item: Some(item),
            parent_local_id: 1,
            is_attachment: true,
            edge: EdgeBehavior::default(),
            crossing_failed: false,
        };

        self.network.store_item(item, object.clone());
        host.region.insert_object(object.clone());
        session.add_attachment(object.clone());
        Ok(object.id)
    }

    /// Places a free-standing object into a region.
    pub fn drop_object(
        &self,
        region: RegionHandle,
        owner: AgentId,
        position: Position,
        edge: EdgeBehavior,
    ) -> Result<ObjectId, SimError> {
        let host = self.host(region)?;
        let index = self.next_object_index();
        let object = SceneObject {
            id: self.ids.object(index),
            name: format!("object-{}", index),
            owner_id: owner,
            position,
            attached_position: Position::zeros(),
            attach_point: 0,
            from_item: None,
            parent_local_id: 0,
            is_attachment: false,
            edge,
            crossing_failed: false,
        };
        host.region.insert_object(object.clone());
        Ok(object.id)
    }

    /// Models a viewer that re-logs into `at` on its own while `from` is
    /// still waiting for the hand-off confirmation.
    pub fn reconnect(&self, agent: AgentId, from: RegionHandle, at: RegionHandle) -> Result<(), SimError> {
        let destination = self.host(at)?;
        let presence = destination
            .region
            .presence(agent)
            .ok_or_else(|| SimError::check(format!("no presence to reconnect to at {}", at)))?;
        presence.restore_root();
        self.host(from)?.region.close_presence(agent);
        info!(agent = %agent, region = %destination.region.info().name, "Viewer reconnected independently");
        Ok(())
    }

    /// Lets virtual time run.
    pub async fn settle(&self, duration: Duration) {
        self.context.sleep(duration).await;
    }

    /// Virtual seconds elapsed since the world was built.
    pub fn elapsed_secs(&self) -> f64 {
        self.context.now().as_secs_f64()
    }
}
