//! AgentSession - an avatar's live presence in a region.

use crate::services::ViewerClient;
use gridwalk_env::{
    AgentCircuit, AgentId, AgentSnapshot, AvatarAppearance, ObjectId, Position, RegionHandle,
    RegionId, SceneObject, SessionId, AGENT_CONTROL_FLY,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Mutable part of a session, guarded by the session's lock.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub position: Position,
    pub velocity: Position,
    pub look_at: Position,
    pub control_flags: u32,
    pub draw_distance: f32,

    /// False while this region is authoritative for the agent
    pub is_child: bool,

    pub appearance: AvatarAppearance,

    /// Object the avatar is seated on, if any
    pub sitting_on: Option<ObjectId>,

    pub attachments: Vec<SceneObject>,

    /// Regions the viewer has been told about
    pub known_regions: BTreeSet<RegionHandle>,
}

/// An avatar's presence in the hosting region, root or child.
///
/// Identity and viewer metadata are fixed at admission; everything the
/// protocol mutates lives in [`SessionState`].
pub struct AgentSession {
    circuit: AgentCircuit,
    client: Arc<dyn ViewerClient>,
    state: Mutex<SessionState>,
}

impl AgentSession {
    /// Admits a session from the circuit it arrived with.
    pub fn new(circuit: AgentCircuit, client: Arc<dyn ViewerClient>) -> Self {
        let state = SessionState {
            position: circuit.start_position,
            velocity: Position::zeros(),
            look_at: Position::new(1.0, 0.0, 0.0),
            control_flags: 0,
            draw_distance: 64.0,
            is_child: circuit.child,
            appearance: circuit.appearance.clone(),
            sitting_on: None,
            attachments: Vec::new(),
            known_regions: circuit.children_seeds.keys().copied().collect(),
        };

        Self {
            circuit,
            client,
            state: Mutex::new(state),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.circuit.agent_id
    }

    pub fn session_id(&self) -> SessionId {
        self.circuit.session_id
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.circuit.first_name, self.circuit.last_name)
    }

    pub fn client(&self) -> &Arc<dyn ViewerClient> {
        &self.client
    }

    /// Capability path the viewer uses for the hosting region.
    pub fn caps_path(&self) -> &str {
        &self.circuit.caps_path
    }

    /// Copy of the current mutable state.
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn is_child(&self) -> bool {
        self.state.lock().is_child
    }

    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    pub fn set_position(&self, position: Position) {
        self.state.lock().position = position;
    }

    pub fn set_velocity(&self, velocity: Position) {
        self.state.lock().velocity = velocity;
    }

    pub fn set_look_at(&self, look_at: Position) {
        self.state.lock().look_at = look_at;
    }

    pub fn draw_distance(&self) -> f32 {
        self.state.lock().draw_distance
    }

    pub fn avatar_height(&self) -> f32 {
        self.state.lock().appearance.avatar_height
    }

    pub fn is_flying(&self) -> bool {
        self.state.lock().control_flags & AGENT_CONTROL_FLY != 0
    }

    pub fn set_flying(&self, flying: bool) {
        let mut state = self.state.lock();
        if flying {
            state.control_flags |= AGENT_CONTROL_FLY;
        } else {
            state.control_flags &= !AGENT_CONTROL_FLY;
        }
    }

    /// Moves the avatar inside the region and stops it.
    pub fn teleport(&self, position: Position) {
        let mut state = self.state.lock();
        state.position = position;
        state.velocity = Position::zeros();
    }

    /// Demotes the session to a child agent.
    pub fn make_child(&self) {
        self.state.lock().is_child = true;
    }

    /// Restores full authority at this region.
    pub fn restore_root(&self) {
        self.state.lock().is_child = false;
    }

    /// Clears motion state left over from the root life of the session.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.velocity = Position::zeros();
        state.sitting_on = None;
    }

    pub fn sit_on(&self, object: ObjectId) {
        self.state.lock().sitting_on = Some(object);
    }

    /// Stands the avatar up. Returns true if it was seated.
    pub fn stand_up(&self) -> bool {
        self.state.lock().sitting_on.take().is_some()
    }

    /// Wears an object, recording its attach point in the appearance.
    pub fn add_attachment(&self, object: SceneObject) {
        let mut state = self.state.lock();
        if let Some(item) = object.from_item {
            state.appearance.attach_points.insert(item, object.attach_point);
        }
        state.attachments.push(object);
    }

    pub fn attachments(&self) -> Vec<SceneObject> {
        self.state.lock().attachments.clone()
    }

    pub fn attachment_count(&self) -> usize {
        self.state.lock().attachments.len()
    }

    /// Detaches every attachment from the session, handing them to the caller.
    pub fn take_attachments(&self) -> Vec<SceneObject> {
        std::mem::take(&mut self.state.lock().attachments)
    }

    /// True when every attachment is worn by this agent and bound to a point.
    pub fn validate_attachments(&self) -> bool {
        let agent = self.agent_id();
        self.state
            .lock()
            .attachments
            .iter()
            .all(|object| object.is_attachment && object.owner_id == agent && object.attach_point != 0)
    }

    pub fn known_regions(&self) -> BTreeSet<RegionHandle> {
        self.state.lock().known_regions.clone()
    }

    pub fn add_known_region(&self, region: RegionHandle) {
        self.state.lock().known_regions.insert(region);
    }

    /// Forgets regions that are no longer neighbors.
    pub fn drop_old_neighbors(&self, stale: &[RegionHandle]) {
        let mut state = self.state.lock();
        for handle in stale {
            state.known_regions.remove(handle);
        }
    }

    /// Full state snapshot for the destination's UpdateAgent call.
    pub fn snapshot(&self, source_region: RegionId, position: Position) -> AgentSnapshot {
        let state = self.state.lock();
        AgentSnapshot {
            agent_id: self.circuit.agent_id,
            session_id: self.circuit.session_id,
            source_region,
            position,
            velocity: state.velocity,
            look_at: state.look_at,
            control_flags: state.control_flags,
            draw_distance: state.draw_distance,
            appearance: state.appearance.clone(),
            callback_uri: None,
        }
    }

    /// Takes over the state pushed by the region the agent is leaving.
    pub fn apply_snapshot(&self, snapshot: &AgentSnapshot) {
        let mut state = self.state.lock();
        state.position = snapshot.position;
        state.velocity = snapshot.velocity;
        state.look_at = snapshot.look_at;
        state.control_flags = snapshot.control_flags;
        state.draw_distance = snapshot.draw_distance;
        state.appearance = snapshot.appearance.clone();
    }

    /// Builds a circuit admitting this session elsewhere.
    ///
    /// The returned circuit is marked as a child; the receiving region only
    /// promotes it once the viewer arrives.
    pub fn circuit_for(&self, start_position: Position, caps_path: String) -> AgentCircuit {
        let state = self.state.lock();
        AgentCircuit {
            start_position,
            child: true,
            appearance: state.appearance.clone(),
            caps_path,
            children_seeds: Default::default(),
            ..self.circuit.clone()
        }
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("agent_id", &self.circuit.agent_id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwalk_env::{
        CrossRegion, EdgeBehavior, ItemId, TeleportFinish, TeleportFlags,
    };
    use std::collections::{BTreeMap, HashMap};
    use std::net::SocketAddr;

    struct NullClient;

    impl ViewerClient for NullClient {
        fn send_teleport_failed(&self, _reason: &str) {}
        fn send_teleport_start(&self, _flags: TeleportFlags) {}
        fn send_teleport_progress(&self, _flags: TeleportFlags, _message: &str) {}
        fn send_local_teleport(&self, _p: Position, _l: Position, _f: TeleportFlags) {}
        fn send_region_teleport(&self, _finish: &TeleportFinish) {}
        fn send_cross_region(&self, _cross: &CrossRegion) {}
        fn inform_client_of_neighbor(&self, _region: RegionHandle, _endpoint: SocketAddr) {}
    }

    fn circuit() -> AgentCircuit {
        AgentCircuit {
            agent_id: AgentId::from_seed(1),
            session_id: SessionId::from_seed(2),
            circuit_code: 77,
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            start_position: Position::new(10.0, 20.0, 30.0),
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

    fn attachment(owner: AgentId, seed: u64) -> SceneObject {
        SceneObject {
            id: ObjectId::from_seed(seed),
            name: format!("hat-{}", seed),
            owner_id: owner,
            position: Position::zeros(),
            attached_position: Position::new(0.0, 0.0, 0.1),
            attach_point: 2,
            from_item: Some(ItemId::from_seed(seed)),
            parent_local_id: 1,
            is_attachment: true,
            edge: EdgeBehavior::default(),
            crossing_failed: false,
        }
    }

    #[test]
    fn test_session_starts_from_circuit() {
        let session = AgentSession::new(circuit(), Arc::new(NullClient));

        assert!(!session.is_child());
        assert_eq!(session.position(), Position::new(10.0, 20.0, 30.0));
        assert_eq!(session.name(), "Test User");
        assert_eq!(session.caps_path(), "rootcaps");
    }

    #[test]
    fn test_child_circuit_inherits_identity() {
        let session = AgentSession::new(circuit(), Arc::new(NullClient));
        let child = session.circuit_for(Position::new(1.0, 2.0, 3.0), "fresh".to_string());

        assert!(child.child);
        assert_eq!(child.agent_id, session.agent_id());
        assert_eq!(child.circuit_code, 77);
        assert_eq!(child.caps_path, "fresh");
        assert_eq!(child.start_position, Position::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_attachments_are_taken_once() {
        let session = AgentSession::new(circuit(), Arc::new(NullClient));
        session.add_attachment(attachment(session.agent_id(), 1));
        session.add_attachment(attachment(session.agent_id(), 2));

        assert!(session.validate_attachments());
        assert_eq!(session.take_attachments().len(), 2);
        assert_eq!(session.attachment_count(), 0);
    }

    #[test]
    fn test_foreign_attachment_is_inconsistent() {
        let session = AgentSession::new(circuit(), Arc::new(NullClient));
        session.add_attachment(attachment(AgentId::from_seed(99), 1));

        assert!(!session.validate_attachments());
    }

    #[test]
    fn test_flying_flag_reaches_snapshot() {
        let session = AgentSession::new(circuit(), Arc::new(NullClient));
        session.set_flying(true);
        session.set_velocity(Position::new(3.0, 0.0, 0.0));

        let snapshot = session.snapshot(RegionId::from_seed(5), Position::new(1.0, 1.0, 1.0));
        assert!(snapshot.is_flying());
        assert_eq!(snapshot.velocity, Position::new(3.0, 0.0, 0.0));
        assert_eq!(snapshot.callback_uri, None);
    }

    #[test]
    fn test_stand_up_and_neighbors() {
        let session = AgentSession::new(circuit(), Arc::new(NullClient));
        session.sit_on(ObjectId::from_seed(3));
        assert!(session.stand_up());
        assert!(!session.stand_up());

        let a = RegionHandle::from_world(0, 0);
        let b = RegionHandle::from_world(256, 0);
        session.add_known_region(a);
        session.add_known_region(b);
        session.drop_old_neighbors(&[a]);
        assert_eq!(session.known_regions().into_iter().collect::<Vec<_>>(), vec![b]);
    }
}
