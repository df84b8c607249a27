//! Simulated viewers and the region-side event queue that reaches them.

use crate::context::SimContext;
use crate::network::SimNetwork;
use gridwalk_core::{EventQueue, ViewerClient};
use gridwalk_env::{
    AgentId, CrossRegion, GridContext, Position, RegionHandle, TeleportFinish, TeleportFlags,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Everything a simulated viewer was told, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ViewerEvent {
    TeleportFailed(String),
    TeleportStart,
    Progress(String),
    LocalTeleport(Position),
    InformNeighbor(RegionHandle),
    EnableSimulator(RegionHandle),
    EstablishCommunication(RegionHandle),
    TeleportFinish(RegionHandle),
    CrossRegion(RegionHandle),
    RefreshOthers,
}

/// A connected viewer.
///
/// When told to move to another region it reconnects there after
/// `confirm_delay`, which promotes the destination presence and fires the
/// release callback. Turning confirmation off models a viewer that never
/// arrives.
pub struct SimViewer {
    agent: AgentId,
    ctx: Arc<SimContext>,
    network: Weak<SimNetwork>,
    confirm_delay: Duration,
    confirms: AtomicBool,
    events: Mutex<Vec<ViewerEvent>>,
}

impl SimViewer {
    pub fn new(agent: AgentId, ctx: Arc<SimContext>, network: Weak<SimNetwork>, confirm_delay: Duration) -> Self {
        Self {
            agent,
            ctx,
            network,
            confirm_delay,
            confirms: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn events(&self) -> Vec<ViewerEvent> {
        self.events.lock().clone()
    }

    pub fn set_confirms_arrival(&self, confirms: bool) {
        self.confirms.store(confirms, Ordering::SeqCst);
    }

    fn push(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }

    /// Connects to the destination once the confirmation delay has passed.
    fn arrive(&self, destination: RegionHandle) {
        if !self.confirms.load(Ordering::SeqCst) {
            debug!(agent = %self.agent, region = %destination, "Viewer ignores move; never arriving");
            return;
        }

        let agent = self.agent;
        let ctx = self.ctx.clone();
        let network = self.network.clone();
        let delay = self.confirm_delay;
        self.ctx.spawn("complete-movement", async move {
            ctx.sleep(delay).await;
            if let Some(network) = network.upgrade() {
                network.complete_movement(agent, destination).await;
            }
        });
    }
}

impl ViewerClient for SimViewer {
    fn send_teleport_failed(&self, reason: &str) {
        self.push(ViewerEvent::TeleportFailed(reason.to_string()));
    }

    fn send_teleport_start(&self, _flags: TeleportFlags) {
        self.push(ViewerEvent::TeleportStart);
    }

    fn send_teleport_progress(&self, _flags: TeleportFlags, message: &str) {
        self.push(ViewerEvent::Progress(message.to_string()));
    }

    fn send_local_teleport(&self, position: Position, _look_at: Position, _flags: TeleportFlags) {
        self.push(ViewerEvent::LocalTeleport(position));
    }

    fn send_region_teleport(&self, finish: &TeleportFinish) {
        self.push(ViewerEvent::TeleportFinish(finish.destination));
        self.arrive(finish.destination);
    }

    fn send_cross_region(&self, cross: &CrossRegion) {
        self.push(ViewerEvent::CrossRegion(cross.destination));
        self.arrive(cross.destination);
    }

    fn inform_client_of_neighbor(&self, region: RegionHandle, _endpoint: SocketAddr) {
        self.push(ViewerEvent::InformNeighbor(region));
    }

    fn refresh_others(&self) {
        self.push(ViewerEvent::RefreshOthers);
    }
}

impl EventQueue for SimViewer {
    fn enable_simulator(&self, _agent: AgentId, region: RegionHandle, _endpoint: SocketAddr, _source: RegionHandle) {
        self.push(ViewerEvent::EnableSimulator(region));
    }

    fn establish_agent_communication(
        &self,
        _agent: AgentId,
        region: RegionHandle,
        _endpoint: SocketAddr,
        _seed_url: &str,
        _source: RegionHandle,
    ) {
        self.push(ViewerEvent::EstablishCommunication(region));
    }

    fn cross_region(&self, message: CrossRegion) {
        self.send_cross_region(&message);
    }

    fn teleport_finish(&self, message: TeleportFinish) {
        self.send_region_teleport(&message);
    }
}

/// A region's event queue, delivering to whichever viewer the agent runs.
pub struct SimEventQueue {
    network: Weak<SimNetwork>,
}

impl SimEventQueue {
    pub fn new(network: Weak<SimNetwork>) -> Self {
        Self { network }
    }

    fn viewer(&self, agent: AgentId) -> Option<Arc<SimViewer>> {
        let viewer = self.network.upgrade().and_then(|network| network.viewer(agent));
        if viewer.is_none() {
            debug!(agent = %agent, "Event for a viewer that is not connected");
        }
        viewer
    }
}

impl EventQueue for SimEventQueue {
    fn enable_simulator(&self, agent: AgentId, region: RegionHandle, endpoint: SocketAddr, source: RegionHandle) {
        if let Some(viewer) = self.viewer(agent) {
            viewer.enable_simulator(agent, region, endpoint, source);
        }
    }

    fn establish_agent_communication(
        &self,
        agent: AgentId,
        region: RegionHandle,
        endpoint: SocketAddr,
        seed_url: &str,
        source: RegionHandle,
    ) {
        if let Some(viewer) = self.viewer(agent) {
            viewer.establish_agent_communication(agent, region, endpoint, seed_url, source);
        }
    }

    fn cross_region(&self, message: CrossRegion) {
        if let Some(viewer) = self.viewer(message.agent_id) {
            EventQueue::cross_region(viewer.as_ref(), message);
        }
    }

    fn teleport_finish(&self, message: TeleportFinish) {
        if let Some(viewer) = self.viewer(message.agent_id) {
            EventQueue::teleport_finish(viewer.as_ref(), message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(destination: RegionHandle) -> TeleportFinish {
        TeleportFinish {
            agent_id: AgentId::from_seed(1),
            destination,
            endpoint: SocketAddr::from(([10, 0, 0, 1], 9000)),
            seed_url: "http://r:9000/CAPS/x0000/".to_string(),
            flags: TeleportFlags::VIA_LOCATION,
            source: RegionHandle::from_grid(1000, 1000, 256),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_recorded_in_order() {
        let viewer = SimViewer::new(
            AgentId::from_seed(1),
            SimContext::shared(1),
            Weak::new(),
            Duration::from_millis(100),
        );
        let dest = RegionHandle::from_grid(1001, 1000, 256);

        viewer.send_teleport_start(TeleportFlags::VIA_LOCATION);
        viewer.send_teleport_progress(TeleportFlags::VIA_LOCATION, "requesting");
        EventQueue::teleport_finish(&viewer, finish(dest));

        assert_eq!(
            viewer.events(),
            vec![
                ViewerEvent::TeleportStart,
                ViewerEvent::Progress("requesting".to_string()),
                ViewerEvent::TeleportFinish(dest),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_confirming_viewer_spawns_nothing() {
        let ctx = SimContext::shared(1);
        let viewer = SimViewer::new(AgentId::from_seed(1), ctx.clone(), Weak::new(), Duration::from_millis(100));
        viewer.set_confirms_arrival(false);

        EventQueue::teleport_finish(&viewer, finish(RegionHandle::from_grid(1001, 1000, 256)));

        assert_eq!(ctx.spawned_tasks(), 0);
    }
}
