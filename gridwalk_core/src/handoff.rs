//! HandoffExecutor - the per-migration state machine.
//!
//! ```text
//! Requesting -> NegotiatingCapabilities -> CreatingRemote -> UpdatingRemote
//!     -> NotifyingViewer -> AwaitingConfirmation -> Finalizing
//!                                               \-> RollingBack | Canceled
//! ```
//!
//! Failures up to CreatingRemote change nothing remotely and only notify
//! the viewer. Later failures roll back: the source session is restored
//! to root and its child agents are re-synchronized.

use crate::attachments::{AttachmentMigrator, AttachmentReport};
use crate::config::TransferConfig;
use crate::destination::Destination;
use crate::error::TransferError;
use crate::neighbors::NeighborNotifier;
use crate::services::{Scene, TransferServices};
use crate::session::AgentSession;
use crate::transit::{ArrivalOutcome, TransitTracker};
use async_trait::async_trait;
use gridwalk_env::{
    AgentCircuit, AgentId, AgentSnapshot, CrossRegion, EnvError, GridContext, RegionHandle,
    RegionInfo, SimulationService, TeleportFinish, TeleportFlags, AGENT_CONTROL_FLY,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// States of one hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    Requesting,
    NegotiatingCapabilities,
    CreatingRemote,
    UpdatingRemote,
    NotifyingViewer,
    AwaitingConfirmation,
    Finalizing,
    RollingBack,
    Canceled,
}

/// What triggered the hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffKind {
    Teleport { flags: TeleportFlags },
    Crossing { is_flying: bool },
}

impl HandoffKind {
    fn flags(&self) -> TeleportFlags {
        match self {
            Self::Teleport { flags } => *flags,
            Self::Crossing { .. } => TeleportFlags::DEFAULT,
        }
    }

    fn is_teleport(&self) -> bool {
        matches!(self, Self::Teleport { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandoffOutcome {
    /// The destination confirmed; the source is now a child (or closed)
    Arrived {
        closed_source: bool,
        attachments: AttachmentReport,
    },
    /// Confirmation never came but the session re-rooted on its own
    Superseded,
}

/// Result of a completed hand-off.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffReport {
    pub agent: AgentId,
    pub destination: RegionHandle,
    pub outcome: HandoffOutcome,

    /// States visited, in order
    pub trail: Vec<HandoffState>,
}

/// Remote half of a hand-off, injectable for custom transports.
#[async_trait]
pub trait HandoffStrategy: Send + Sync {
    async fn create_agent(
        &self,
        destination: &RegionInfo,
        circuit: &AgentCircuit,
        flags: TeleportFlags,
    ) -> Result<(), EnvError>;

    async fn update_agent(
        &self,
        destination: &RegionInfo,
        snapshot: &AgentSnapshot,
    ) -> Result<(), EnvError>;

    /// Stamps the URL the destination calls once the viewer arrived.
    fn set_callback_url(&self, snapshot: &mut AgentSnapshot, source: &RegionInfo);

    /// Hook run after the agent left, before the source session is demoted.
    async fn agent_moved_away(&self, _session: &AgentSession, _destination: &RegionInfo) {}
}

/// Strategy backed directly by the simulation service.
pub struct DefaultHandoffStrategy {
    simulation: Arc<dyn SimulationService>,
}

impl DefaultHandoffStrategy {
    pub fn new(simulation: Arc<dyn SimulationService>) -> Self {
        Self { simulation }
    }
}

#[async_trait]
impl HandoffStrategy for DefaultHandoffStrategy {
    async fn create_agent(
        &self,
        destination: &RegionInfo,
        circuit: &AgentCircuit,
        flags: TeleportFlags,
    ) -> Result<(), EnvError> {
        self.simulation.create_agent(destination, circuit, flags).await
    }

    async fn update_agent(
        &self,
        destination: &RegionInfo,
        snapshot: &AgentSnapshot,
    ) -> Result<(), EnvError> {
        self.simulation.update_agent(destination, snapshot).await
    }

    fn set_callback_url(&self, snapshot: &mut AgentSnapshot, source: &RegionInfo) {
        snapshot.callback_uri = Some(format!(
            "{}/agent/{}/{}/release/",
            source.http_base(),
            snapshot.agent_id.as_uuid(),
            source.id.as_uuid()
        ));
    }
}

/// Progress of one run, carried through rollback.
struct Attempt {
    agent: AgentId,
    kind: HandoffKind,
    destination: RegionInfo,

    /// True when this attempt created the remote agent from scratch
    created_fresh: bool,
    trail: Vec<HandoffState>,
}

impl Attempt {
    fn enter(&mut self, state: HandoffState) {
        debug!(agent = %self.agent, region = %self.destination.handle(), state = ?state, "Hand-off transition");
        self.trail.push(state);
    }
}

pub struct HandoffExecutor<C: GridContext> {
    ctx: Arc<C>,
    scene: Arc<dyn Scene>,
    services: TransferServices,
    strategy: Arc<dyn HandoffStrategy>,
    tracker: TransitTracker,
    neighbors: Arc<NeighborNotifier<C>>,
    attachments: AttachmentMigrator,
    config: TransferConfig,
}

impl<C: GridContext> HandoffExecutor<C> {
    pub fn new(
        ctx: Arc<C>,
        scene: Arc<dyn Scene>,
        services: TransferServices,
        strategy: Arc<dyn HandoffStrategy>,
        tracker: TransitTracker,
        neighbors: Arc<NeighborNotifier<C>>,
        config: TransferConfig,
    ) -> Self {
        let attachments = AttachmentMigrator::new(scene.clone(), services.simulation.clone());
        Self {
            ctx,
            scene,
            services,
            strategy,
            tracker,
            neighbors,
            attachments,
            config,
        }
    }

    /// Runs one hand-off of `session` to `destination` to completion.
    ///
    /// The caller must hold the agent's transit slot for the whole run.
    pub async fn run(
        &self,
        session: Arc<AgentSession>,
        destination: Destination,
        kind: HandoffKind,
    ) -> Result<HandoffReport, TransferError> {
        let agent = session.agent_id();
        let source = self.scene.region();
        let dest = destination.region.clone();
        let flags = kind.flags();
        let client = session.client().clone();
        let mut attempt = Attempt {
            agent,
            kind,
            destination: dest.clone(),
            created_fresh: false,
            trail: Vec::new(),
        };

        attempt.enter(HandoffState::Requesting);
        info!(
            agent = %agent,
            from = %source.name,
            to = %dest.name,
            far = destination.is_far,
            kind = ?kind,
            "Starting hand-off"
        );

        let Some(endpoint) = dest.endpoint else {
            return Err(self.fail_early(&session, kind, TransferError::DestinationUnreachable(dest.name.clone())));
        };

        if kind.is_teleport() {
            client.send_teleport_start(flags);
            client.send_teleport_progress(flags, "requesting");
            if !session.validate_attachments() {
                client.send_teleport_progress(flags, "missing_attach_tport");
                return Err(self.fail_early(&session, kind, TransferError::InconsistentAttachments));
            }
        }

        attempt.enter(HandoffState::NegotiatingCapabilities);
        let existing_seed = self.services.capabilities.child_seed(agent, dest.handle());
        let (caps_path, create, fresh) = match (&kind, existing_seed) {
            (HandoffKind::Crossing { .. }, Some(seed)) => (seed, false, false),
            (HandoffKind::Teleport { .. }, Some(seed)) if !destination.is_far => (seed, true, false),
            _ => (self.ctx.random_caps_path(), true, true),
        };

        if self.tracker.is_cancel_requested(agent) {
            return self.cancel(&session, &source, attempt).await;
        }

        attempt.enter(HandoffState::CreatingRemote);
        if create {
            let mut circuit = session.circuit_for(destination.position, caps_path.clone());
            circuit.children_seeds = self.services.capabilities.children_seeds(agent);
            circuit.children_seeds.insert(dest.handle(), caps_path.clone());

            if let Err(e) = self.strategy.create_agent(&dest, &circuit, flags).await {
                let err = match e {
                    EnvError::Unreachable(_) => TransferError::DestinationUnreachable(dest.name.clone()),
                    other => TransferError::DestinationRejected(other.reason()),
                };
                return Err(self.fail_early(&session, kind, err));
            }
            attempt.created_fresh = fresh;
        } else {
            debug!(agent = %agent, region = %dest.handle(), "Child agent already present; skipping create");
        }

        if self.tracker.is_cancel_requested(agent) {
            return self.cancel(&session, &source, attempt).await;
        }

        attempt.enter(HandoffState::UpdatingRemote);
        if kind.is_teleport() {
            client.send_teleport_progress(flags, "sending_dest");
        }
        let mut snapshot = session.snapshot(source.id, destination.position);
        if let HandoffKind::Crossing { is_flying: true } = kind {
            snapshot.control_flags |= AGENT_CONTROL_FLY;
        }
        self.strategy.set_callback_url(&mut snapshot, &source);

        if let Err(e) = self.strategy.update_agent(&dest, &snapshot).await {
            warn!(agent = %agent, region = %dest.handle(), error = %e, "Destination refused agent update");
            return self
                .rollback(&session, &source, attempt, TransferError::HandoffFailed(e.reason()))
                .await;
        }

        attempt.enter(HandoffState::NotifyingViewer);
        if attempt.created_fresh {
            let mut seeds = self.services.capabilities.children_seeds(agent);
            seeds.insert(dest.handle(), caps_path.clone());
            self.services.capabilities.set_children_seeds(agent, seeds);
        }
        let seed_url = dest.caps_seed_url(&caps_path);

        if destination.is_far {
            match &self.services.event_queue {
                Some(queue) => {
                    queue.enable_simulator(agent, dest.handle(), endpoint, source.handle());
                    self.ctx.sleep(self.config.enable_simulator_delay()).await;
                    queue.establish_agent_communication(agent, dest.handle(), endpoint, &seed_url, source.handle());
                }
                None => client.inform_client_of_neighbor(dest.handle(), endpoint),
            }
        }

        let deadline = self.ctx.now() + self.config.confirmation_timeout();
        self.tracker.set_in_transit(agent, deadline);
        session.make_child();

        match kind {
            HandoffKind::Teleport { flags } => {
                client.send_teleport_progress(flags, "arriving");
                let finish = TeleportFinish {
                    agent_id: agent,
                    destination: dest.handle(),
                    endpoint,
                    seed_url,
                    flags,
                    source: source.handle(),
                };
                match &self.services.event_queue {
                    Some(queue) => queue.teleport_finish(finish),
                    None => client.send_region_teleport(&finish),
                }
            }
            HandoffKind::Crossing { .. } => {
                let cross = CrossRegion {
                    agent_id: agent,
                    session_id: session.session_id(),
                    destination: dest.handle(),
                    position: destination.position,
                    velocity: snapshot.velocity,
                    endpoint,
                    seed_url,
                    source: source.handle(),
                };
                match &self.services.event_queue {
                    Some(queue) => queue.cross_region(cross),
                    None => client.send_cross_region(&cross),
                }
            }
        }

        attempt.enter(HandoffState::AwaitingConfirmation);
        let outcome = self
            .tracker
            .wait_for_arrival(self.ctx.as_ref(), agent, self.config.confirmation_timeout())
            .await;

        match outcome {
            ArrivalOutcome::Arrived => {
                // Root again here, or gone: the session moved on by itself
                if !self.scene.presence(agent).map(|p| p.is_child()).unwrap_or(false) {
                    warn!(agent = %agent, "Arrival confirmed, but the local session is no longer a child; not finalizing");
                    return Ok(HandoffReport {
                        agent,
                        destination: dest.handle(),
                        outcome: HandoffOutcome::Superseded,
                        trail: attempt.trail,
                    });
                }
            }
            ArrivalOutcome::Canceled => return self.cancel(&session, &source, attempt).await,
            ArrivalOutcome::TimedOut => {
                self.tracker.reset_from_transit(agent);
                // Best-effort check only: a reconnection landing right after
                // this read is not excluded.
                let still_waiting = self.scene.presence(agent).map(|p| p.is_child()).unwrap_or(false);
                if still_waiting {
                    warn!(agent = %agent, region = %dest.handle(), "No arrival confirmation; rolling back");
                    return self
                        .rollback(&session, &source, attempt, TransferError::CallbackTimeout)
                        .await;
                }
                warn!(agent = %agent, "No arrival confirmation, but session re-rooted elsewhere; leaving it");
                return Ok(HandoffReport {
                    agent,
                    destination: dest.handle(),
                    outcome: HandoffOutcome::Superseded,
                    trail: attempt.trail,
                });
            }
        }

        attempt.enter(HandoffState::Finalizing);
        let attachments = self.attachments.migrate(&session, &dest).await;
        for failure in &attachments.failed {
            warn!(agent = %agent, error = %failure, "Attachment left behind");
        }

        self.scene.broadcast_kill_avatar(agent);
        self.strategy.agent_moved_away(&session, &dest).await;
        session.make_child();
        self.scene.cleanup_dropped_attachments();

        let mut closed_source = false;
        if destination.is_far {
            self.ctx.sleep(self.config.close_grace_delay()).await;
            if let Some(presence) = self.scene.presence(agent) {
                if presence.is_child() {
                    self.scene.close_presence(agent);
                    closed_source = true;
                }
            }
        } else {
            session.reset();
            if !kind.is_teleport() {
                client.refresh_others();
            }
        }
        self.tracker.clear_cancel(agent);

        info!(agent = %agent, to = %dest.name, closed_source, "Hand-off complete");
        Ok(HandoffReport {
            agent,
            destination: dest.handle(),
            outcome: HandoffOutcome::Arrived {
                closed_source,
                attachments,
            },
            trail: attempt.trail,
        })
    }

    /// Reports a failure that happened before any remote state changed.
    fn fail_early(&self, session: &AgentSession, kind: HandoffKind, err: TransferError) -> TransferError {
        warn!(agent = %session.agent_id(), error = %err, "Hand-off aborted");
        if kind.is_teleport() {
            session.client().send_teleport_failed(&err.user_message());
        }
        self.tracker.clear_cancel(session.agent_id());
        err
    }

    async fn cancel(
        &self,
        session: &Arc<AgentSession>,
        source: &RegionInfo,
        mut attempt: Attempt,
    ) -> Result<HandoffReport, TransferError> {
        attempt.enter(HandoffState::Canceled);
        info!(agent = %attempt.agent, "Hand-off canceled by user");
        self.rollback(session, source, attempt, TransferError::Canceled).await
    }

    async fn rollback(
        &self,
        session: &Arc<AgentSession>,
        source: &RegionInfo,
        mut attempt: Attempt,
        err: TransferError,
    ) -> Result<HandoffReport, TransferError> {
        attempt.enter(HandoffState::RollingBack);
        let agent = attempt.agent;

        if attempt.kind.is_teleport() {
            session.client().send_teleport_failed(&err.user_message());
        }

        if attempt.created_fresh {
            if let Err(e) = self.services.simulation.close_agent(&attempt.destination, agent).await {
                error!(agent = %agent, region = %attempt.destination.handle(), error = %e, "Failed to close remote agent");
            }
        }

        session.restore_root();
        self.tracker.reset_from_transit(agent);
        self.neighbors.enable_child_agents(session, source).await;
        self.tracker.clear_cancel(agent);

        debug!(agent = %agent, trail = ?attempt.trail, "Hand-off rolled back");
        Err(err)
    }
}
