//! In-memory collaborators shared by the protocol's unit tests.

use crate::config::TransferConfig;
use crate::services::{
    CapabilityModule, EventQueue, HomeDirectory, HomeLocation, Scene, TransferServices,
    ViewerClient,
};
use crate::session::AgentSession;
use async_trait::async_trait;
use gridwalk_env::{
    AgentCircuit, AgentId, AgentSnapshot, AvatarAppearance, CreateObjectRequest, CrossRegion,
    EnvError, GridService, ItemId, ObjectId, Position, RegionHandle, RegionId, RegionInfo,
    SceneObject, SessionId, SimulationService, TeleportFinish, TeleportFlags, TokioContext,
    EdgeBehavior,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    TeleportFailed(String),
    TeleportStart(TeleportFlags),
    Progress(String),
    LocalTeleport(Position),
    RegionTeleport(RegionHandle),
    CrossRegionDirect(RegionHandle),
    InformNeighbor(RegionHandle),
    RefreshOthers,
    EnableSimulator(RegionHandle),
    EstablishCommunication(RegionHandle, String),
    CrossRegion(RegionHandle),
    TeleportFinish(RegionHandle),
}

#[derive(Default)]
pub struct TestViewer {
    pub events: Mutex<Vec<ViewerEvent>>,
}

impl TestViewer {
    pub fn events(&self) -> Vec<ViewerEvent> {
        self.events.lock().clone()
    }

    fn push(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }
}

impl ViewerClient for TestViewer {
    fn send_teleport_failed(&self, reason: &str) {
        self.push(ViewerEvent::TeleportFailed(reason.to_string()));
    }

    fn send_teleport_start(&self, flags: TeleportFlags) {
        self.push(ViewerEvent::TeleportStart(flags));
    }

    fn send_teleport_progress(&self, _flags: TeleportFlags, message: &str) {
        self.push(ViewerEvent::Progress(message.to_string()));
    }

    fn send_local_teleport(&self, position: Position, _look_at: Position, _flags: TeleportFlags) {
        self.push(ViewerEvent::LocalTeleport(position));
    }

    fn send_region_teleport(&self, finish: &TeleportFinish) {
        self.push(ViewerEvent::RegionTeleport(finish.destination));
    }

    fn send_cross_region(&self, cross: &CrossRegion) {
        self.push(ViewerEvent::CrossRegionDirect(cross.destination));
    }

    fn inform_client_of_neighbor(&self, region: RegionHandle, _endpoint: SocketAddr) {
        self.push(ViewerEvent::InformNeighbor(region));
    }

    fn refresh_others(&self) {
        self.push(ViewerEvent::RefreshOthers);
    }
}

impl EventQueue for TestViewer {
    fn enable_simulator(&self, _a: AgentId, region: RegionHandle, _e: SocketAddr, _s: RegionHandle) {
        self.push(ViewerEvent::EnableSimulator(region));
    }

    fn establish_agent_communication(
        &self,
        _agent: AgentId,
        region: RegionHandle,
        _endpoint: SocketAddr,
        seed_url: &str,
        _source: RegionHandle,
    ) {
        self.push(ViewerEvent::EstablishCommunication(region, seed_url.to_string()));
    }

    fn cross_region(&self, message: CrossRegion) {
        self.push(ViewerEvent::CrossRegion(message.destination));
    }

    fn teleport_finish(&self, message: TeleportFinish) {
        self.push(ViewerEvent::TeleportFinish(message.destination));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Create { region: RegionHandle, caps_path: String },
    Update { region: RegionHandle, snapshot: AgentSnapshot },
    Object { region: RegionHandle, request: CreateObjectRequest },
    Close { region: RegionHandle, agent: AgentId },
}

#[derive(Default)]
pub struct TestSimulation {
    pub calls: Mutex<Vec<SimCall>>,
    pub reject_create: Mutex<HashSet<RegionHandle>>,
    pub reject_update: Mutex<HashSet<RegionHandle>>,
    pub reject_object: Mutex<HashSet<RegionHandle>>,
}

impl TestSimulation {
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().clone()
    }

    pub fn creates_at(&self, region: RegionHandle) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SimCall::Create { region: r, .. } if *r == region))
            .count()
    }

    pub fn closes_at(&self, region: RegionHandle) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SimCall::Close { region: r, .. } if *r == region))
            .count()
    }
}

#[async_trait]
impl SimulationService for TestSimulation {
    async fn create_agent(
        &self,
        destination: &RegionInfo,
        circuit: &AgentCircuit,
        _flags: TeleportFlags,
    ) -> Result<(), EnvError> {
        self.calls.lock().push(SimCall::Create {
            region: destination.handle(),
            caps_path: circuit.caps_path.clone(),
        });
        if self.reject_create.lock().contains(&destination.handle()) {
            return Err(EnvError::rejected("region is full"));
        }
        Ok(())
    }

    async fn update_agent(
        &self,
        destination: &RegionInfo,
        snapshot: &AgentSnapshot,
    ) -> Result<(), EnvError> {
        self.calls.lock().push(SimCall::Update {
            region: destination.handle(),
            snapshot: snapshot.clone(),
        });
        if self.reject_update.lock().contains(&destination.handle()) {
            return Err(EnvError::rejected("snapshot refused"));
        }
        Ok(())
    }

    async fn create_object(
        &self,
        destination: &RegionInfo,
        request: CreateObjectRequest,
    ) -> Result<(), EnvError> {
        self.calls.lock().push(SimCall::Object {
            region: destination.handle(),
            request,
        });
        if self.reject_object.lock().contains(&destination.handle()) {
            return Err(EnvError::rejected("no room"));
        }
        Ok(())
    }

    async fn close_agent(&self, destination: &RegionInfo, agent: AgentId) -> Result<(), EnvError> {
        self.calls.lock().push(SimCall::Close {
            region: destination.handle(),
            agent,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct TestGrid {
    pub regions: Mutex<Vec<RegionInfo>>,
    pub defaults: Mutex<Vec<RegionInfo>>,
}

#[async_trait]
impl GridService for TestGrid {
    async fn region_by_handle(&self, handle: RegionHandle) -> Option<RegionInfo> {
        self.regions.lock().iter().find(|r| r.handle() == handle).cloned()
    }

    async fn region_by_name(&self, name: &str) -> Option<RegionInfo> {
        self.regions
            .lock()
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    async fn region_by_id(&self, id: RegionId) -> Option<RegionInfo> {
        self.regions.lock().iter().find(|r| r.id == id).cloned()
    }

    async fn default_regions(&self) -> Vec<RegionInfo> {
        self.defaults.lock().clone()
    }

    async fn region_range(&self, x_min: i64, x_max: i64, y_min: i64, y_max: i64) -> Vec<RegionInfo> {
        self.regions
            .lock()
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
            .lock()
            .iter()
            .filter(|r| {
                let dx = (r.grid_x as i64 - region.grid_x as i64).abs();
                let dy = (r.grid_y as i64 - region.grid_y as i64).abs();
                dx <= 1 && dy <= 1 && !(dx == 0 && dy == 0)
            })
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct TestCapabilities {
    pub seeds: Mutex<HashMap<AgentId, BTreeMap<RegionHandle, String>>>,
}

impl CapabilityModule for TestCapabilities {
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

#[derive(Default)]
pub struct TestHomes {
    pub homes: Mutex<HashMap<AgentId, HomeLocation>>,
}

#[async_trait]
impl HomeDirectory for TestHomes {
    async fn home_location(&self, agent: AgentId) -> Option<HomeLocation> {
        self.homes.lock().get(&agent).cloned()
    }
}

pub struct TestScene {
    pub region: RegionInfo,
    pub terrain: f32,
    pub presences: Mutex<HashMap<AgentId, Arc<AgentSession>>>,
    pub objects: Mutex<HashMap<ObjectId, SceneObject>>,
    pub deny_teleport: Mutex<Option<String>>,
    pub killed_avatars: Mutex<Vec<AgentId>>,
    pub killed_objects: Mutex<Vec<ObjectId>>,
    pub returned: Mutex<Vec<ObjectId>>,
    pub full_updates: Mutex<Vec<ObjectId>>,
}

impl TestScene {
    pub fn new(region: RegionInfo) -> Self {
        Self {
            region,
            terrain: 20.0,
            presences: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            deny_teleport: Mutex::new(None),
            killed_avatars: Mutex::new(Vec::new()),
            killed_objects: Mutex::new(Vec::new()),
            returned: Mutex::new(Vec::new()),
            full_updates: Mutex::new(Vec::new()),
        }
    }

    pub fn add_object(&self, object: SceneObject) {
        self.objects.lock().insert(object.id, object);
    }
}

impl Scene for TestScene {
    fn region(&self) -> RegionInfo {
        self.region.clone()
    }

    fn presence(&self, agent: AgentId) -> Option<Arc<AgentSession>> {
        self.presences.lock().get(&agent).cloned()
    }

    fn terrain_height(&self, _x: f32, _y: f32) -> f32 {
        self.terrain
    }

    fn can_teleport(&self, _agent: AgentId, position: Position) -> Result<Position, String> {
        match self.deny_teleport.lock().clone() {
            Some(reason) => Err(reason),
            None => Ok(position),
        }
    }

    fn broadcast_kill(&self, objects: &[ObjectId]) {
        self.killed_objects.lock().extend_from_slice(objects);
    }

    fn broadcast_kill_avatar(&self, agent: AgentId) {
        self.killed_avatars.lock().push(agent);
    }

    fn object(&self, id: ObjectId) -> Option<SceneObject> {
        self.objects.lock().get(&id).cloned()
    }

    fn set_object_position(&self, id: ObjectId, position: Position) {
        if let Some(object) = self.objects.lock().get_mut(&id) {
            object.position = position;
        }
    }

    fn delete_object(&self, id: ObjectId) -> bool {
        self.objects.lock().remove(&id).is_some()
    }

    fn return_object(&self, id: ObjectId) -> bool {
        let removed = self.objects.lock().remove(&id).is_some();
        if removed {
            self.returned.lock().push(id);
        }
        removed
    }

    fn mark_crossing_failed(&self, id: ObjectId) {
        if let Some(object) = self.objects.lock().get_mut(&id) {
            object.crossing_failed = true;
        }
    }

    fn schedule_full_update(&self, id: ObjectId) {
        self.full_updates.lock().push(id);
    }

    fn close_presence(&self, agent: AgentId) {
        self.presences.lock().remove(&agent);
    }
}

pub fn region(seed: u64, name: &str, grid_x: u32, grid_y: u32) -> RegionInfo {
    RegionInfo {
        id: RegionId::from_seed(seed),
        name: name.to_string(),
        grid_x,
        grid_y,
        size: 256,
        external_host: format!("{}.grid", name.to_lowercase()),
        http_port: 9000,
        endpoint: Some(SocketAddr::from(([10, 0, 0, seed as u8], 9000))),
    }
}

pub fn circuit(agent: AgentId, position: Position) -> AgentCircuit {
    AgentCircuit {
        agent_id: agent,
        session_id: SessionId::from_seed(agent.as_uuid().as_u128() as u64),
        circuit_code: 1234,
        first_name: "Test".to_string(),
        last_name: "Resident".to_string(),
        start_position: position,
        child: false,
        appearance: AvatarAppearance::default(),
        caps_path: "rootcaps".to_string(),
        children_seeds: BTreeMap::new(),
        service_urls: HashMap::new(),
        ip_address: "127.0.0.1".to_string(),
        viewer: "test".to_string(),
        channel: "test".to_string(),
        mac: String::new(),
        id0: String::new(),
    }
}

pub fn attachment(owner: AgentId, seed: u64) -> SceneObject {
    SceneObject {
        id: ObjectId::from_seed(seed),
        name: format!("attachment-{}", seed),
        owner_id: owner,
        position: Position::new(128.0, 128.0, 25.0),
        attached_position: Position::new(0.0, 0.0, 0.2),
        attach_point: 2,
        from_item: Some(ItemId::from_seed(seed)),
        parent_local_id: 7,
        is_attachment: true,
        edge: EdgeBehavior::default(),
        crossing_failed: false,
    }
}

/// A 3x3 block of regions around "Center" plus one far-away region.
pub struct Fixture {
    pub ctx: Arc<TokioContext>,
    pub grid: Arc<TestGrid>,
    pub simulation: Arc<TestSimulation>,
    pub viewer: Arc<TestViewer>,
    pub capabilities: Arc<TestCapabilities>,
    pub homes: Arc<TestHomes>,
    pub scene: Arc<TestScene>,
    pub config: TransferConfig,
    pub center: RegionInfo,
    pub west: RegionInfo,
    pub far: RegionInfo,
}

impl Fixture {
    pub fn new() -> Self {
        let mut regions = Vec::new();
        let mut seed = 1;
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let name = if dx == 1 && dy == 1 {
                    "Center".to_string()
                } else {
                    format!("N{}{}", dx, dy)
                };
                regions.push(region(seed, &name, 999 + dx, 999 + dy));
                seed += 1;
            }
        }
        let far = region(50, "Far", 1010, 1000);
        regions.push(far.clone());

        let center = regions[4].clone();
        let west = regions[3].clone();
        let grid = Arc::new(TestGrid::default());
        *grid.regions.lock() = regions;
        *grid.defaults.lock() = vec![far.clone()];

        Self {
            ctx: TokioContext::shared(),
            grid,
            simulation: Arc::new(TestSimulation::default()),
            viewer: Arc::new(TestViewer::default()),
            capabilities: Arc::new(TestCapabilities::default()),
            homes: Arc::new(TestHomes::default()),
            scene: Arc::new(TestScene::new(center.clone())),
            config: TransferConfig::default(),
            center,
            west,
            far,
        }
    }

    pub fn services(&self) -> TransferServices {
        TransferServices {
            grid: self.grid.clone(),
            simulation: self.simulation.clone(),
            event_queue: Some(self.viewer.clone()),
            capabilities: self.capabilities.clone(),
            homes: self.homes.clone(),
        }
    }

    /// Admits a root agent into the center region.
    pub fn add_agent(&self, seed: u64, position: Position) -> Arc<AgentSession> {
        let agent = AgentId::from_seed(seed);
        let session = Arc::new(AgentSession::new(circuit(agent, position), self.viewer.clone()));
        self.scene.presences.lock().insert(agent, session.clone());
        session
    }

    /// Handle of every region in the 3x3 block.
    pub fn block_handles(&self) -> Vec<RegionHandle> {
        self.grid
            .regions
            .lock()
            .iter()
            .filter(|r| r.name != "Far")
            .map(|r| r.handle())
            .collect()
    }
}
