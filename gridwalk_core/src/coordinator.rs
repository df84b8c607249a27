//! TransferCoordinator - public entry point of the migration protocol.
//!
//! One coordinator per hosting region. It receives movement triggers,
//! resolves the target and either relocates in place or spawns a hand-off
//! task. The caller never waits on network round-trips; a hand-off's
//! result is delivered through its [`TransferHandle`].

use crate::config::TransferConfig;
use crate::crossing::{CrossingOutcome, ObjectCrossing};
use crate::destination::{Destination, DestinationNegotiator, TargetRef};
use crate::error::TransferError;
use crate::handoff::{DefaultHandoffStrategy, HandoffExecutor, HandoffKind, HandoffReport, HandoffStrategy};
use crate::neighbors::{NeighborNotifier, NeighborUpdate};
use crate::services::{Scene, TransferServices};
use crate::session::AgentSession;
use crate::transit::{PendingTransfer, TransitGuard, TransitTracker};
use gridwalk_env::{AgentId, GridContext, ObjectId, Position, RegionHandle, TeleportFlags};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Pending result of a spawned hand-off.
#[derive(Debug)]
pub struct TransferHandle {
    agent: AgentId,
    result: oneshot::Receiver<Result<HandoffReport, TransferError>>,
}

impl TransferHandle {
    pub fn agent(&self) -> AgentId {
        self.agent
    }

    /// Waits for the hand-off to finish.
    pub async fn outcome(self) -> Result<HandoffReport, TransferError> {
        self.result
            .await
            .unwrap_or_else(|_| Err(TransferError::HandoffFailed("hand-off task dropped".to_string())))
    }
}

/// How a teleport request was carried out.
#[derive(Debug)]
pub enum TeleportOutcome {
    /// Relocated inside the current region
    Local(Position),
    /// Handed off to another region
    Remote(TransferHandle),
}

pub struct TransferCoordinator<C: GridContext> {
    ctx: Arc<C>,
    scene: Arc<dyn Scene>,
    services: TransferServices,
    tracker: TransitTracker,
    negotiator: Arc<DestinationNegotiator>,
    neighbors: Arc<NeighborNotifier<C>>,
    executor: Arc<HandoffExecutor<C>>,
    objects: ObjectCrossing,
    config: TransferConfig,
}

impl<C: GridContext> TransferCoordinator<C> {
    /// Builds a coordinator using the simulation service directly for hand-offs.
    pub fn new(ctx: Arc<C>, scene: Arc<dyn Scene>, services: TransferServices, config: TransferConfig) -> Self {
        let strategy = Arc::new(DefaultHandoffStrategy::new(services.simulation.clone()));
        Self::with_strategy(ctx, scene, services, strategy, config)
    }

    /// Builds a coordinator with a custom hand-off strategy.
    pub fn with_strategy(
        ctx: Arc<C>,
        scene: Arc<dyn Scene>,
        services: TransferServices,
        strategy: Arc<dyn HandoffStrategy>,
        config: TransferConfig,
    ) -> Self {
        let tracker = TransitTracker::new();
        let negotiator = Arc::new(DestinationNegotiator::new(services.grid.clone(), config.clone()));
        let neighbors = Arc::new(NeighborNotifier::new(ctx.clone(), services.clone(), config.clone()));
        let executor = Arc::new(HandoffExecutor::new(
            ctx.clone(),
            scene.clone(),
            services.clone(),
            strategy,
            tracker.clone(),
            neighbors.clone(),
            config.clone(),
        ));
        let objects = ObjectCrossing::new(scene.clone(), services.simulation.clone(), negotiator.clone());

        Self {
            ctx,
            scene,
            services,
            tracker,
            negotiator,
            neighbors,
            executor,
            objects,
            config,
        }
    }

    pub fn tracker(&self) -> &TransitTracker {
        &self.tracker
    }

    fn root_presence(&self, agent: AgentId) -> Result<Arc<AgentSession>, TransferError> {
        self.scene
            .presence(agent)
            .filter(|p| !p.is_child())
            .ok_or(TransferError::AgentNotFound(agent))
    }

    fn begin(&self, agent: AgentId) -> Result<TransitGuard, TransferError> {
        self.tracker
            .begin(PendingTransfer::new(agent, self.ctx.now()))
            .map_err(|agent| {
                debug!(agent = %agent, "Rejecting trigger; migration already running");
                TransferError::TransferInProgress(agent)
            })
    }

    /// Teleports an agent to a handle, name or landmark target.
    pub async fn request_teleport(
        &self,
        agent: AgentId,
        target: TargetRef,
        position: Position,
        look_at: Position,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome, TransferError> {
        let session = self.root_presence(agent)?;
        let guard = self.begin(agent)?;
        let client = session.client().clone();

        let (look_at, flags) = match target {
            TargetRef::Landmark(_) => (
                Position::zeros(),
                flags | TeleportFlags::SET_LAST_TO_TARGET | TeleportFlags::VIA_LANDMARK,
            ),
            _ => (look_at, flags),
        };

        let position = match self.scene.can_teleport(agent, position) {
            Ok(allowed) => allowed,
            Err(reason) => {
                client.send_teleport_failed(&reason);
                return Err(TransferError::PermissionDenied(reason));
            }
        };

        let current = self.scene.region();
        let local_target = match &target {
            TargetRef::Handle(handle) if *handle == current.handle() => Some(position),
            TargetRef::Handle(handle) => self.negotiator.shift_into(&current, *handle, position),
            TargetRef::Landmark(id) if *id == current.id => Some(position),
            _ => None,
        };
        if let Some(position) = local_target {
            return Ok(self.relocate_locally(&session, position, look_at, flags));
        }

        let region = match self.negotiator.resolve(&target).await {
            Ok(region) => region,
            Err(e) => {
                client.send_teleport_failed(&e.user_message());
                return Err(e);
            }
        };
        if region.id == current.id {
            return Ok(self.relocate_locally(&session, position, look_at, flags));
        }

        let destination = match self.negotiator.negotiate(&current, region, position).await {
            Ok(destination) => destination,
            Err(e) => {
                client.send_teleport_failed(&e.user_message());
                return Err(e);
            }
        };

        if session.stand_up() {
            debug!(agent = %agent, "Stood up before teleport");
        }
        session.set_look_at(look_at);

        Ok(TeleportOutcome::Remote(self.spawn_handoff(
            guard,
            session,
            destination,
            HandoffKind::Teleport { flags },
        )))
    }

    fn relocate_locally(
        &self,
        session: &AgentSession,
        position: Position,
        look_at: Position,
        flags: TeleportFlags,
    ) -> TeleportOutcome {
        let corrected = self
            .negotiator
            .local_position(position, session.avatar_height(), |x, y| self.scene.terrain_height(x, y));

        let client = session.client();
        client.send_teleport_start(flags);
        session.teleport(corrected);
        session.set_look_at(look_at);
        client.send_local_teleport(corrected, look_at, flags);

        debug!(agent = %session.agent_id(), position = ?corrected, "Relocated within region");
        TeleportOutcome::Local(corrected)
    }

    /// Teleports an agent to its recorded home, or to a grid default region.
    pub async fn request_teleport_home(&self, agent: AgentId) -> Result<TeleportOutcome, TransferError> {
        let session = self.root_presence(agent)?;
        if self.tracker.is_pending(agent) {
            debug!(agent = %agent, "Rejecting home teleport; migration already running");
            return Err(TransferError::TransferInProgress(agent));
        }
        let flags = TeleportFlags::SET_LAST_TO_TARGET | TeleportFlags::VIA_HOME;
        let not_found = || TransferError::DestinationNotFound("Your home region could not be found.".to_string());

        let (region, position, look_at) = match self.services.homes.home_location(agent).await {
            Some(home) => {
                let region = self.services.grid.region_by_id(home.region).await;
                (region, home.position, home.look_at)
            }
            None => {
                let region = self.services.grid.default_regions().await.into_iter().next();
                (
                    region,
                    self.config.default_home_position(),
                    self.config.default_home_look_at(),
                )
            }
        };

        let Some(region) = region else {
            let err = not_found();
            session.client().send_teleport_failed(&err.user_message());
            return Err(err);
        };

        info!(agent = %agent, home = %region.name, "Teleporting home");
        self.request_teleport(agent, TargetRef::Handle(region.handle()), position, look_at, flags)
            .await
    }

    /// Flags an agent's running migration for cancellation.
    pub fn request_cancel(&self, agent: AgentId) -> bool {
        let accepted = self.tracker.request_cancel(agent);
        if accepted {
            info!(agent = %agent, "Cancel requested");
        }
        accepted
    }

    /// Handles an agent whose movement carried it across a border.
    pub async fn notify_crossed_border(
        &self,
        agent: AgentId,
        new_position: Position,
        is_flying: bool,
    ) -> Result<TransferHandle, TransferError> {
        let session = self.root_presence(agent)?;
        let guard = self.begin(agent)?;
        let current = self.scene.region();

        let (destination, crossing) = match self.negotiator.crossing_target(&current, new_position).await {
            Ok(found) => found,
            Err(e) => {
                session.set_position(self.hold_at_border(new_position));
                warn!(agent = %agent, error = %e, "Crossing refused; holding agent at the border");
                return Err(e);
            }
        };

        debug!(agent = %agent, dx = crossing.dx, dy = crossing.dy, to = %destination.region.name, "Border crossed");
        session.set_position(new_position);
        session.set_flying(is_flying);

        Ok(self.spawn_handoff(guard, session, destination, HandoffKind::Crossing { is_flying }))
    }

    fn hold_at_border(&self, position: Position) -> Position {
        let low = self.config.boundary_distance;
        let high = self.config.region_size as f32 - self.config.boundary_distance;
        Position::new(position.x.clamp(low, high), position.y.clamp(low, high), position.z)
    }

    /// Arrival confirmation from the destination (the release callback).
    pub fn agent_arrived_at_destination(&self, agent: AgentId) -> bool {
        let released = self.tracker.reset_from_transit(agent);
        if released {
            info!(agent = %agent, "Destination confirmed arrival");
        } else {
            debug!(agent = %agent, "Arrival confirmation for an agent not in transit");
        }
        released
    }

    /// Moves a free-standing object that left the region.
    pub async fn cross_object(&self, object: ObjectId, new_position: Position) -> Result<CrossingOutcome, TransferError> {
        self.objects.cross(object, new_position).await
    }

    /// Synchronizes child agents around a session that became root here.
    pub async fn enable_child_agents(&self, agent: AgentId) -> Result<NeighborUpdate, TransferError> {
        let session = self.root_presence(agent)?;
        Ok(self.neighbors.enable_child_agents(&session, &self.scene.region()).await)
    }

    /// Opens a child agent for a root session in one more region.
    pub async fn enable_child_agent(&self, agent: AgentId, region: RegionHandle) -> Result<(), TransferError> {
        let session = self.root_presence(agent)?;
        let Some(region) = self.services.grid.region_by_handle(region).await else {
            return Err(TransferError::DestinationNotFound(format!("Region {} is not on the grid", region)));
        };
        self.neighbors.enable_child_agent(&session, &self.scene.region(), region).await;
        Ok(())
    }

    fn spawn_handoff(
        &self,
        guard: TransitGuard,
        session: Arc<AgentSession>,
        destination: Destination,
        kind: HandoffKind,
    ) -> TransferHandle {
        let agent = session.agent_id();
        self.tracker.set_destination(agent, destination.region.handle());

        let (tx, rx) = oneshot::channel();
        let executor = self.executor.clone();
        self.ctx.spawn("handoff", async move {
            let result = executor.run(session, destination, kind).await;
            if let Err(e) = &result {
                if e.is_pre_remote() {
                    debug!(agent = %agent, error = %e, "Hand-off refused before the destination changed");
                } else {
                    warn!(agent = %agent, error = %e, "Hand-off failed after contacting the destination");
                }
            }
            // Free the slot before anyone observes the result
            drop(guard);
            let _ = tx.send(result);
        });

        TransferHandle { agent, result: rx }
    }
}
