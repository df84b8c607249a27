//! Simulated region-to-region transport with fault injection.

use crate::context::SimContext;
use crate::region::RegionHost;
use crate::viewer::SimViewer;
use async_trait::async_trait;
use gridwalk_core::{Scene, ViewerClient};
use gridwalk_env::{
    AgentCircuit, AgentId, AgentSnapshot, CreateObjectRequest, EnvError, GridContext, ItemId,
    RegionHandle, RegionId, RegionInfo, SceneObject, SimulationService, TeleportFlags,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// The remote operations a region can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    CreateAgent,
    UpdateAgent,
    CreateObject,
    CloseAgent,
}

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Regions no call can reach
    partitioned: Mutex<HashSet<RegionHandle>>,

    /// Calls a reachable region answers with a refusal
    refusals: Mutex<HashMap<(RemoteCall, RegionHandle), String>>,

    /// Per-region one-way latency in milliseconds
    latency: Mutex<HashMap<RegionHandle, u64>>,
}

impl SimNetworkController {
    pub fn new() -> Self {
        Self {
            partitioned: Mutex::new(HashSet::new()),
            refusals: Mutex::new(HashMap::new()),
            latency: Mutex::new(HashMap::new()),
        }
    }

    /// Cuts a region off from everyone.
    pub fn partition(&self, region: RegionHandle) {
        self.partitioned.lock().insert(region);
    }

    pub fn heal(&self, region: RegionHandle) {
        self.partitioned.lock().remove(&region);
    }

    /// Heals all active partitions.
    pub fn heal_all(&self) {
        self.partitioned.lock().clear();
    }

    pub fn is_reachable(&self, region: RegionHandle) -> bool {
        !self.partitioned.lock().contains(&region)
    }

    /// Makes a region refuse one kind of call with the given reason.
    pub fn refuse(&self, call: RemoteCall, region: RegionHandle, reason: impl Into<String>) {
        self.refusals.lock().insert((call, region), reason.into());
    }

    pub fn clear_refusals(&self) {
        self.refusals.lock().clear();
    }

    pub fn refusal(&self, call: RemoteCall, region: RegionHandle) -> Option<String> {
        self.refusals.lock().get(&(call, region)).cloned()
    }

    pub fn set_latency(&self, region: RegionHandle, latency_ms: u64) {
        self.latency.lock().insert(region, latency_ms);
    }

    /// Gets the latency towards a region (default 0).
    pub fn latency(&self, region: RegionHandle) -> Duration {
        Duration::from_millis(*self.latency.lock().get(&region).unwrap_or(&0))
    }
}

impl Default for SimNetworkController {
    fn default() -> Self {
        Self::new()
    }
}

/// Traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub create_agent: u64,
    pub update_agent: u64,
    pub create_object: u64,
    pub close_agent: u64,

    /// Calls that hit a partitioned region
    pub dropped: u64,

    /// Calls answered with an injected refusal
    pub refused: u64,

    /// Release callbacks delivered to source regions
    pub releases: u64,
}

/// The simulated grid network: routes remote calls to region hosts.
pub struct SimNetwork {
    ctx: Arc<SimContext>,
    controller: SimNetworkController,
    hosts: RwLock<HashMap<RegionHandle, Arc<RegionHost>>>,
    viewers: RwLock<HashMap<AgentId, Arc<SimViewer>>>,

    /// Shared inventory attachments are rezzed from
    inventory: RwLock<HashMap<ItemId, SceneObject>>,

    stats: Mutex<NetworkStats>,
}

impl SimNetwork {
    pub fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            ctx,
            controller: SimNetworkController::new(),
            hosts: RwLock::new(HashMap::new()),
            viewers: RwLock::new(HashMap::new()),
            inventory: RwLock::new(HashMap::new()),
            stats: Mutex::new(NetworkStats::default()),
        }
    }

    pub fn controller(&self) -> &SimNetworkController {
        &self.controller
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.lock().clone()
    }

    pub fn add_host(&self, host: Arc<RegionHost>) {
        self.hosts.write().insert(host.region.info().handle(), host);
    }

    pub fn host(&self, region: RegionHandle) -> Option<Arc<RegionHost>> {
        self.hosts.read().get(&region).cloned()
    }

    pub fn host_by_id(&self, id: RegionId) -> Option<Arc<RegionHost>> {
        self.hosts.read().values().find(|h| h.region.info().id == id).cloned()
    }

    /// Every host, ordered by handle.
    pub fn hosts(&self) -> Vec<Arc<RegionHost>> {
        let mut hosts: Vec<_> = self.hosts.read().values().cloned().collect();
        hosts.sort_by_key(|h| h.region.info().handle());
        hosts
    }

    pub fn add_viewer(&self, viewer: Arc<SimViewer>) {
        self.viewers.write().insert(viewer.agent(), viewer);
    }

    pub fn viewer(&self, agent: AgentId) -> Option<Arc<SimViewer>> {
        self.viewers.read().get(&agent).cloned()
    }

    pub fn viewers(&self) -> Vec<Arc<SimViewer>> {
        self.viewers.read().values().cloned().collect()
    }

    /// Stores an item so that any region can rez it.
    pub fn store_item(&self, item: ItemId, object: SceneObject) {
        self.inventory.write().insert(item, object);
    }

    /// Applies latency, partitions and refusals to one call.
    async fn deliver(&self, call: RemoteCall, destination: &RegionInfo) -> Result<Arc<RegionHost>, EnvError> {
        let handle = destination.handle();
        {
            let mut stats = self.stats.lock();
            match call {
                RemoteCall::CreateAgent => stats.create_agent += 1,
                RemoteCall::UpdateAgent => stats.update_agent += 1,
                RemoteCall::CreateObject => stats.create_object += 1,
                RemoteCall::CloseAgent => stats.close_agent += 1,
            }
        }

        let latency = self.controller.latency(handle);
        if !latency.is_zero() {
            self.ctx.sleep(latency).await;
        }

        if !self.controller.is_reachable(handle) {
            self.stats.lock().dropped += 1;
            debug!(region = %handle, call = ?call, "Call dropped by partition");
            return Err(EnvError::unreachable(handle));
        }
        let host = self.host(handle).ok_or_else(|| EnvError::unreachable(handle))?;

        if let Some(reason) = self.controller.refusal(call, handle) {
            self.stats.lock().refused += 1;
            return Err(EnvError::rejected(reason));
        }
        Ok(host)
    }

    /// A viewer reached `destination`: promote it there and release the source.
    pub async fn complete_movement(&self, agent: AgentId, destination: RegionHandle) {
        let Some(host) = self.host(destination) else {
            warn!(agent = %agent, region = %destination, "Viewer moved to an unknown region");
            return;
        };
        let Some(callback) = host.region.complete_movement(agent) else {
            debug!(agent = %agent, region = %destination, "Viewer arrived with no hand-off pending");
            return;
        };

        match Self::release_region(&callback).and_then(|id| self.host_by_id(id)) {
            Some(source) if self.controller.is_reachable(source.region.info().handle()) => {
                self.stats.lock().releases += 1;
                source.coordinator.agent_arrived_at_destination(agent);
            }
            Some(source) => {
                warn!(agent = %agent, region = %source.region.info().name, "Release callback lost to partition");
            }
            None => warn!(agent = %agent, callback = %callback, "Release callback names no known region"),
        }

        if let Err(e) = host.coordinator.enable_child_agents(agent).await {
            warn!(agent = %agent, error = %e, "Could not open neighbors after arrival");
        }
    }

    /// Region id in `http://host:port/agent/{agent}/{region}/release/`.
    fn release_region(callback: &str) -> Option<RegionId> {
        let mut segments = callback.trim_end_matches('/').rsplit('/');
        if segments.next()? != "release" {
            return None;
        }
        let region = segments.next()?;
        Uuid::parse_str(region).ok().map(RegionId::from_uuid)
    }
}

#[async_trait]
impl SimulationService for SimNetwork {
    async fn create_agent(
        &self,
        destination: &RegionInfo,
        circuit: &AgentCircuit,
        _flags: TeleportFlags,
    ) -> Result<(), EnvError> {
        let host = self.deliver(RemoteCall::CreateAgent, destination).await?;
        let viewer = self
            .viewer(circuit.agent_id)
            .ok_or_else(|| EnvError::rejected("No viewer connected for this agent"))?;
        let client: Arc<dyn ViewerClient> = viewer;
        host.region.admit(circuit, client)
    }

    async fn update_agent(&self, destination: &RegionInfo, snapshot: &AgentSnapshot) -> Result<(), EnvError> {
        let host = self.deliver(RemoteCall::UpdateAgent, destination).await?;
        host.region.receive_snapshot(snapshot)
    }

    async fn create_object(&self, destination: &RegionInfo, request: CreateObjectRequest) -> Result<(), EnvError> {
        let host = self.deliver(RemoteCall::CreateObject, destination).await?;
        match request {
            CreateObjectRequest::Object(object) => host.region.receive_object(object),
            CreateObjectRequest::FromInventory { owner, item } => {
                let object = self
                    .inventory
                    .read()
                    .get(&item)
                    .cloned()
                    .ok_or_else(|| EnvError::rejected("Inventory item not found"))?;
                host.region.rez_attachment(owner, object)
            }
        }
    }

    async fn close_agent(&self, destination: &RegionInfo, agent: AgentId) -> Result<(), EnvError> {
        let host = self.deliver(RemoteCall::CloseAgent, destination).await?;
        host.region.close_presence(agent);
        Ok(())
    }
}
