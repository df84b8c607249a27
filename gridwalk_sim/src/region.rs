//! Simulated region host: an in-memory scene graph plus its coordinator.

use crate::context::SimContext;
use gridwalk_core::{AgentSession, Scene, TransferCoordinator, ViewerClient};
use gridwalk_env::{
    AgentCircuit, AgentId, AgentSnapshot, EnvError, ObjectId, Position, RegionInfo, SceneObject,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Counters of scene side effects observed during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    pub killed_objects: u64,
    pub killed_avatars: u64,
    pub returned_objects: u64,
    pub full_updates: u64,
    pub closed_presences: u64,
}

/// One region's scene: presences, objects and incoming hand-off state.
pub struct SimRegion {
    info: RegionInfo,

    /// Flat terrain height (meters)
    terrain_height: f32,

    presences: RwLock<HashMap<AgentId, Arc<AgentSession>>>,
    objects: RwLock<HashMap<ObjectId, SceneObject>>,

    /// Release callbacks of snapshots waiting for their viewer
    callbacks: Mutex<HashMap<AgentId, String>>,

    /// Agents refused by this region (and owners of refused objects)
    banned: Mutex<HashSet<AgentId>>,

    /// Reason given to every teleport attempt while set
    teleport_block: Mutex<Option<String>>,

    stats: Mutex<RegionStats>,
}

impl SimRegion {
    pub fn new(info: RegionInfo, terrain_height: f32) -> Self {
        Self {
            info,
            terrain_height,
            presences: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            banned: Mutex::new(HashSet::new()),
            teleport_block: Mutex::new(None),
            stats: Mutex::new(RegionStats::default()),
        }
    }

    pub fn info(&self) -> &RegionInfo {
        &self.info
    }

    pub fn presences(&self) -> Vec<Arc<AgentSession>> {
        self.presences.read().values().cloned().collect()
    }

    pub fn objects(&self) -> Vec<SceneObject> {
        self.objects.read().values().cloned().collect()
    }

    pub fn stats(&self) -> RegionStats {
        self.stats.lock().clone()
    }

    /// True while a snapshot has arrived but its viewer has not.
    pub fn awaiting_viewer(&self, agent: AgentId) -> bool {
        self.callbacks.lock().contains_key(&agent)
    }

    pub fn ban(&self, agent: AgentId) {
        self.banned.lock().insert(agent);
    }

    pub fn block_teleports(&self, reason: impl Into<String>) {
        *self.teleport_block.lock() = Some(reason.into());
    }

    /// Places a session directly into the scene (login).
    pub fn insert_presence(&self, session: Arc<AgentSession>) {
        self.presences.write().insert(session.agent_id(), session);
    }

    /// Places an object directly into the scene.
    pub fn insert_object(&self, object: SceneObject) {
        self.objects.write().insert(object.id, object);
    }

    /// Incoming CreateAgent: admits a child presence, or refreshes an existing one.
    pub fn admit(&self, circuit: &AgentCircuit, client: Arc<dyn ViewerClient>) -> Result<(), EnvError> {
        let agent = circuit.agent_id;
        if self.banned.lock().contains(&agent) {
            return Err(EnvError::rejected("You are banned from the region"));
        }

        let mut presences = self.presences.write();
        if presences.contains_key(&agent) {
            debug!(agent = %agent, region = %self.info.name, "Circuit refreshed for existing presence");
            return Ok(());
        }

        presences.insert(agent, Arc::new(AgentSession::new(circuit.clone(), client)));
        debug!(agent = %agent, region = %self.info.name, child = circuit.child, "Presence admitted");
        Ok(())
    }

    /// Incoming UpdateAgent: takes over the state pushed by the source.
    pub fn receive_snapshot(&self, snapshot: &AgentSnapshot) -> Result<(), EnvError> {
        let presence = self
            .presences
            .read()
            .get(&snapshot.agent_id)
            .cloned()
            .ok_or_else(|| EnvError::rejected("No circuit for this agent"))?;

        presence.apply_snapshot(snapshot);
        if let Some(callback) = &snapshot.callback_uri {
            self.callbacks.lock().insert(snapshot.agent_id, callback.clone());
        }
        Ok(())
    }

    /// Incoming CreateObject with full object state.
    pub fn receive_object(&self, mut object: SceneObject) -> Result<(), EnvError> {
        if self.banned.lock().contains(&object.owner_id) {
            return Err(EnvError::rejected("Object owner is banned from the region"));
        }

        let mut objects = self.objects.write();
        if objects.contains_key(&object.id) {
            return Err(EnvError::rejected("Object already exists in the region"));
        }

        object.crossing_failed = false;
        debug!(object = %object.id, region = %self.info.name, "Object received");
        objects.insert(object.id, object);
        Ok(())
    }

    /// Incoming CreateObject from inventory: re-attaches the item to its owner.
    pub fn rez_attachment(&self, owner: AgentId, mut object: SceneObject) -> Result<(), EnvError> {
        if self.banned.lock().contains(&owner) {
            return Err(EnvError::rejected("Object owner is banned from the region"));
        }
        let presence = self
            .presences
            .read()
            .get(&owner)
            .cloned()
            .ok_or_else(|| EnvError::rejected("Attachment owner is not in the region"))?;

        if let Some(point) = object
            .from_item
            .and_then(|item| presence.state().appearance.attach_points.get(&item).copied())
        {
            object.attach_point = point;
        }
        object.is_attachment = true;
        object.owner_id = owner;
        object.position = presence.position();
        object.crossing_failed = false;

        self.objects.write().insert(object.id, object.clone());
        presence.add_attachment(object);
        Ok(())
    }

    /// The viewer reached this region: promotes the presence to root.
    ///
    /// Returns the release callback of the pending hand-off, if any.
    pub fn complete_movement(&self, agent: AgentId) -> Option<String> {
        let presence = self.presences.read().get(&agent).cloned()?;
        let callback = self.callbacks.lock().remove(&agent)?;
        presence.restore_root();
        info!(agent = %agent, region = %self.info.name, "Agent became root");
        Some(callback)
    }
}

impl Scene for SimRegion {
    fn region(&self) -> RegionInfo {
        self.info.clone()
    }

    fn presence(&self, agent: AgentId) -> Option<Arc<AgentSession>> {
        self.presences.read().get(&agent).cloned()
    }

    fn terrain_height(&self, _x: f32, _y: f32) -> f32 {
        self.terrain_height
    }

    fn can_teleport(&self, _agent: AgentId, position: Position) -> Result<Position, String> {
        match self.teleport_block.lock().as_ref() {
            Some(reason) => Err(reason.clone()),
            None => Ok(position),
        }
    }

    fn broadcast_kill(&self, objects: &[ObjectId]) {
        self.stats.lock().killed_objects += objects.len() as u64;
    }

    fn broadcast_kill_avatar(&self, _agent: AgentId) {
        self.stats.lock().killed_avatars += 1;
    }

    fn object(&self, id: ObjectId) -> Option<SceneObject> {
        self.objects.read().get(&id).cloned()
    }

    fn set_object_position(&self, id: ObjectId, position: Position) {
        if let Some(object) = self.objects.write().get_mut(&id) {
            object.position = position;
        }
    }

    fn delete_object(&self, id: ObjectId) -> bool {
        self.objects.write().remove(&id).is_some()
    }

    fn return_object(&self, id: ObjectId) -> bool {
        let returned = self.objects.write().remove(&id).is_some();
        if returned {
            self.stats.lock().returned_objects += 1;
        }
        returned
    }

    fn mark_crossing_failed(&self, id: ObjectId) {
        if let Some(object) = self.objects.write().get_mut(&id) {
            object.crossing_failed = true;
        }
    }

    fn schedule_full_update(&self, _id: ObjectId) {
        self.stats.lock().full_updates += 1;
    }

    fn close_presence(&self, agent: AgentId) {
        self.callbacks.lock().remove(&agent);
        if self.presences.write().remove(&agent).is_some() {
            self.stats.lock().closed_presences += 1;
            debug!(agent = %agent, region = %self.info.name, "Presence closed");
        }
    }

    fn cleanup_dropped_attachments(&self) {
        let presences = self.presences.read();
        self.objects.write().retain(|_, object| {
            !object.is_attachment
                || presences
                    .get(&object.owner_id)
                    .map_or(false, |presence| !presence.is_child())
        });
    }
}

/// A region plus the coordinator that runs migrations out of it.
pub struct RegionHost {
    pub region: Arc<SimRegion>,
    pub coordinator: TransferCoordinator<SimContext>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwalk_env::{
        AvatarAppearance, CrossRegion, EdgeBehavior, ItemId, RegionHandle, RegionId, SessionId,
        TeleportFinish, TeleportFlags,
    };
    use std::collections::BTreeMap;
    use std::net::SocketAddr;

    struct SilentViewer;

    impl ViewerClient for SilentViewer {
        fn send_teleport_failed(&self, _reason: &str) {}
        fn send_teleport_start(&self, _flags: TeleportFlags) {}
        fn send_teleport_progress(&self, _flags: TeleportFlags, _message: &str) {}
        fn send_local_teleport(&self, _p: Position, _l: Position, _f: TeleportFlags) {}
        fn send_region_teleport(&self, _finish: &TeleportFinish) {}
        fn send_cross_region(&self, _cross: &CrossRegion) {}
        fn inform_client_of_neighbor(&self, _region: RegionHandle, _endpoint: SocketAddr) {}
    }

    fn region() -> SimRegion {
        SimRegion::new(
            RegionInfo {
                id: RegionId::from_seed(1),
                name: "Test".to_string(),
                grid_x: 1000,
                grid_y: 1000,
                size: 256,
                external_host: "test.grid".to_string(),
                http_port: 9000,
                endpoint: None,
            },
            21.0,
        )
    }

    fn circuit(agent: AgentId) -> AgentCircuit {
        AgentCircuit {
            agent_id: agent,
            session_id: SessionId::from_seed(2),
            circuit_code: 7,
            first_name: "Sim".to_string(),
            last_name: "Resident".to_string(),
            start_position: Position::new(128.0, 128.0, 70.0),
            child: true,
            appearance: AvatarAppearance::default(),
            caps_path: "caps".to_string(),
            children_seeds: BTreeMap::new(),
            service_urls: HashMap::new(),
            ip_address: "127.0.0.1".to_string(),
            viewer: "sim".to_string(),
            channel: "sim".to_string(),
            mac: String::new(),
            id0: String::new(),
        }
    }

    fn snapshot(agent: AgentId, callback: Option<&str>) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: agent,
            session_id: SessionId::from_seed(2),
            source_region: RegionId::from_seed(9),
            position: Position::new(3.0, 4.0, 25.0),
            velocity: Position::zeros(),
            look_at: Position::new(1.0, 0.0, 0.0),
            control_flags: 0,
            draw_distance: 64.0,
            appearance: AvatarAppearance::default(),
            callback_uri: callback.map(str::to_string),
        }
    }

    #[test]
    fn test_admit_is_idempotent() {
        let region = region();
        let agent = AgentId::from_seed(1);

        region.admit(&circuit(agent), Arc::new(SilentViewer)).unwrap();
        let first = region.presence(agent).unwrap();
        region.admit(&circuit(agent), Arc::new(SilentViewer)).unwrap();

        assert!(Arc::ptr_eq(&first, &region.presence(agent).unwrap()));
        assert!(first.is_child());
    }

    #[test]
    fn test_banned_agent_is_refused() {
        let region = region();
        let agent = AgentId::from_seed(1);
        region.ban(agent);

        let err = region.admit(&circuit(agent), Arc::new(SilentViewer)).unwrap_err();
        assert_eq!(err.reason(), "You are banned from the region");
        assert!(region.presence(agent).is_none());
    }

    #[test]
    fn test_snapshot_then_arrival_promotes_presence() {
        let region = region();
        let agent = AgentId::from_seed(1);
        region.admit(&circuit(agent), Arc::new(SilentViewer)).unwrap();

        // No snapshot yet, so nothing to complete
        assert!(region.complete_movement(agent).is_none());

        region.receive_snapshot(&snapshot(agent, Some("http://a:1/release/"))).unwrap();
        assert!(region.awaiting_viewer(agent));

        assert_eq!(region.complete_movement(agent).as_deref(), Some("http://a:1/release/"));
        let presence = region.presence(agent).unwrap();
        assert!(!presence.is_child());
        assert_eq!(presence.position(), Position::new(3.0, 4.0, 25.0));
    }

    #[test]
    fn test_snapshot_without_circuit_is_refused() {
        let region = region();
        assert!(region.receive_snapshot(&snapshot(AgentId::from_seed(5), None)).is_err());
    }

    #[test]
    fn test_rez_attachment_wears_object() {
        let region = region();
        let agent = AgentId::from_seed(1);
        region.admit(&circuit(agent), Arc::new(SilentViewer)).unwrap();
        let object = SceneObject {
            id: ObjectId::from_seed(3),
            name: "hat".to_string(),
            owner_id: agent,
            position: Position::zeros(),
            attached_position: Position::new(0.0, 0.0, 0.1),
            attach_point: 2,
            from_item: Some(ItemId::from_seed(3)),
            parent_local_id: 0,
            is_attachment: false,
            edge: EdgeBehavior::default(),
            crossing_failed: false,
        };

        region.rez_attachment(agent, object).unwrap();

        let presence = region.presence(agent).unwrap();
        assert_eq!(presence.attachment_count(), 1);
        assert!(region.object(ObjectId::from_seed(3)).unwrap().is_attachment);
    }

    #[test]
    fn test_cleanup_drops_attachments_of_departed_wearers() {
        let region = region();
        let agent = AgentId::from_seed(1);
        region.admit(&circuit(agent), Arc::new(SilentViewer)).unwrap();
        region.insert_object(SceneObject {
            id: ObjectId::from_seed(4),
            name: "ring".to_string(),
            owner_id: agent,
            position: Position::zeros(),
            attached_position: Position::zeros(),
            attach_point: 5,
            from_item: None,
            parent_local_id: 1,
            is_attachment: true,
            edge: EdgeBehavior::default(),
            crossing_failed: false,
        });

        // The presence is a child, so its attachments are stale
        region.cleanup_dropped_attachments();
        assert!(region.objects().is_empty());
    }
}
