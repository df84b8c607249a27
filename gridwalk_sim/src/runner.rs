//! Scenario runner - drives migration scenarios on a paused clock.

use crate::error::{ensure, SimError};
use crate::network::{NetworkStats, RemoteCall};
use crate::oracle::{Oracle, Violation};
use crate::region::{RegionHost, RegionStats};
use crate::scenarios::ScenarioId;
use crate::viewer::ViewerEvent;
use crate::world::{SimConfig, SimWorld};

use gridwalk_core::{
    CapabilityModule, CrossingOutcome, HandoffOutcome, Scene, TargetRef, TeleportOutcome,
    TransferError, TransferHandle,
};
use gridwalk_env::{AgentId, EdgeBehavior, Position, RegionHandle, TeleportFlags};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time given to neighbor notifications after a root change.
const SETTLE: Duration = Duration::from_secs(2);

/// Quiet period before the oracle inspects the grid.
const FINAL_SETTLE: Duration = Duration::from_secs(10);

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the scenario's checks and the oracle both passed
    pub passed: bool,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Grid-wide invariants broken at the end of the run
    pub violations: Vec<Violation>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Region-to-region calls
    pub network: NetworkStats,

    /// Scene side effects summed over every region
    pub regions: RegionStats,

    /// Background tasks spawned through the context
    pub spawned_tasks: u64,

    /// Messages received by all viewers
    pub viewer_events: usize,
}

/// Runs migration scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Viewer travel time to a destination
    confirmation_delay_ms: u64,

    /// Push through event queues instead of the viewer fallbacks
    event_queue: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        let defaults = SimConfig::default();
        Self {
            seed,
            confirmation_delay_ms: defaults.confirmation_delay_ms,
            event_queue: defaults.event_queue,
        }
    }

    /// Sets how long viewers take to arrive.
    pub fn with_confirmation_delay(mut self, millis: u64) -> Self {
        self.confirmation_delay_ms = millis;
        self
    }

    /// Switches between event-queue and direct viewer delivery.
    pub fn with_event_queue(mut self, enabled: bool) -> Self {
        self.event_queue = enabled;
        self
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            confirmation_delay_ms: self.confirmation_delay_ms,
            event_queue: self.event_queue,
            ..SimConfig::default()
        }
    }

    /// Runs a scenario and returns the result.
    ///
    /// Each run gets its own paused current-thread runtime, so virtual time
    /// only advances when every task is blocked.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                return ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    final_time_secs: 0.0,
                    failure_reason: Some(format!("Could not build runtime: {}", e)),
                    violations: Vec::new(),
                    metrics: ScenarioMetrics::default(),
                }
            }
        };

        runtime.block_on(self.run_async(scenario))
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let world = SimWorld::new(self.config());
        let mut oracle = Oracle::new();

        let outcome = match scenario {
            ScenarioId::WalkWest => Self::walk_west(&world).await,
            ScenarioId::TeleportFar => Self::teleport_far(&world).await,
            ScenarioId::TeleportNear => Self::teleport_near(&world).await,
            ScenarioId::DestinationMissing => Self::destination_missing(&world).await,
            ScenarioId::DestinationRefused => Self::destination_refused(&world).await,
            ScenarioId::UpdateRefused => Self::update_refused(&world).await,
            ScenarioId::CancelMidFlight => Self::cancel_mid_flight(&world).await,
            ScenarioId::CallbackTimeout => Self::callback_timeout(&world).await,
            ScenarioId::ReconnectRace => Self::reconnect_race(&world).await,
            ScenarioId::ObjectCrossing => Self::object_crossing(&world).await,
            ScenarioId::AttachmentCarry => Self::attachment_carry(&world, &mut oracle).await,
            ScenarioId::ConcurrentTrigger => Self::concurrent_trigger(&world).await,
            ScenarioId::PartitionedNeighbor => Self::partitioned_neighbor(&world).await,
            ScenarioId::HomeTeleport => Self::home_teleport(&world).await,
        };

        world.settle(FINAL_SETTLE).await;
        let violations = oracle.check(&world);
        for violation in &violations {
            warn!(scenario = %scenario, "Oracle violation: {}", violation);
        }

        let failure_reason = match (&outcome, violations.first()) {
            (Err(e), _) => Some(e.to_string()),
            (Ok(()), Some(v)) => Some(v.to_string()),
            (Ok(()), None) => None,
        };
        let passed = failure_reason.is_none();
        if passed {
            info!("✅ Scenario {} PASSED", scenario.name());
        } else {
            warn!("❌ Scenario {} FAILED: {:?}", scenario.name(), failure_reason);
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            final_time_secs: world.elapsed_secs(),
            failure_reason,
            violations,
            metrics: Self::collect_metrics(&world),
        }
    }

    fn collect_metrics(world: &SimWorld) -> ScenarioMetrics {
        let mut regions = RegionStats::default();
        for host in world.network.hosts() {
            let stats = host.region.stats();
            regions.killed_objects += stats.killed_objects;
            regions.killed_avatars += stats.killed_avatars;
            regions.returned_objects += stats.returned_objects;
            regions.full_updates += stats.full_updates;
            regions.closed_presences += stats.closed_presences;
        }

        ScenarioMetrics {
            network: world.network.stats(),
            regions,
            spawned_tasks: world.context.spawned_tasks(),
            viewer_events: world.network.viewers().iter().map(|v| v.events().len()).sum(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Logs an agent in and lets its child agents settle.
    async fn arrive(world: &SimWorld, index: u64, region: RegionHandle, position: Position) -> Result<AgentId, SimError> {
        let agent = world.login(index, region, position)?;
        world.open_neighbors(agent).await?;
        world.settle(SETTLE).await;
        Ok(agent)
    }

    fn remote(outcome: TeleportOutcome) -> Result<TransferHandle, SimError> {
        match outcome {
            TeleportOutcome::Remote(handle) => Ok(handle),
            TeleportOutcome::Local(position) => Err(SimError::check(format!(
                "expected a hand-off, got a local move to {:?}",
                position
            ))),
        }
    }

    /// Teleports to `target` and waits for the hand-off result.
    async fn teleport(
        host: &RegionHost,
        agent: AgentId,
        target: TargetRef,
        position: Position,
    ) -> Result<Result<gridwalk_core::HandoffReport, TransferError>, SimError> {
        let outcome = host
            .coordinator
            .request_teleport(agent, target, position, Position::new(1.0, 0.0, 0.0), TeleportFlags::VIA_LOCATION)
            .await?;
        Ok(Self::remote(outcome)?.outcome().await)
    }

    /// Polls until the source is waiting for the arrival callback.
    async fn wait_in_transit(world: &SimWorld, host: &RegionHost, agent: AgentId) -> Result<(), SimError> {
        for _ in 0..200 {
            if host.coordinator.tracker().is_in_transit(agent) {
                return Ok(());
            }
            world.settle(Duration::from_millis(50)).await;
        }
        Err(SimError::check(format!("agent {} never reached the confirmation wait", agent)))
    }

    fn is_root(host: &RegionHost, agent: AgentId) -> bool {
        host.region.presence(agent).map_or(false, |p| !p.is_child())
    }

    fn is_child(host: &RegionHost, agent: AgentId) -> bool {
        host.region.presence(agent).map_or(false, |p| p.is_child())
    }

    fn root_handle(world: &SimWorld, agent: AgentId) -> Result<RegionHandle, SimError> {
        Ok(world.root_host(agent)?.region.info().handle())
    }

    fn seed_regions(world: &SimWorld, agent: AgentId) -> Vec<RegionHandle> {
        world.capabilities.children_seeds(agent).into_keys().collect()
    }

    fn center_position() -> Position {
        Position::new(128.0, 128.0, 25.0)
    }

    // ========================================================================
    // DST-001: Walk west
    // ========================================================================

    async fn walk_west(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let west = world.block_region(0, 1);
        let agent = Self::arrive(world, 1, world.center(), Position::new(1.0, 40.0, 25.0)).await?;

        let handle = center
            .coordinator
            .notify_crossed_border(agent, Position::new(0.05, 40.0, 25.0), false)
            .await?;
        let report = handle.outcome().await?;
        debug!(trail = ?report.trail, "Crossing finished");
        world.settle(SETTLE).await;

        ensure(report.destination == west, format!("crossed into {} instead of {}", report.destination, west))?;
        ensure(
            matches!(report.outcome, HandoffOutcome::Arrived { closed_source: false, .. }),
            format!("unexpected crossing outcome {:?}", report.outcome),
        )?;
        ensure(Self::root_handle(world, agent)? == west, "root did not move west")?;
        let position = world.root_session(agent)?.position();
        ensure(
            position == Position::new(255.5, 40.0, 25.0),
            format!("entered the west region at {:?}", position),
        )?;
        ensure(Self::is_child(&center, agent), "source did not keep a child agent")?;
        ensure(
            world.viewer(agent)?.events().contains(&ViewerEvent::CrossRegion(west)),
            "viewer never told to cross",
        )
    }

    // ========================================================================
    // DST-002: Teleport far
    // ========================================================================

    async fn teleport_far(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let island = world.island();
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;

        let report = Self::teleport(&center, agent, TargetRef::Name("Island".to_string()), Position::new(100.0, 100.0, 30.0))
            .await??;
        world.settle(SETTLE).await;

        ensure(report.destination == island, format!("landed in {}", report.destination))?;
        ensure(
            matches!(report.outcome, HandoffOutcome::Arrived { closed_source: true, .. }),
            format!("far teleport kept the source: {:?}", report.outcome),
        )?;
        ensure(center.region.presence(agent).is_none(), "source presence survived a far teleport")?;
        ensure(Self::root_handle(world, agent)? == island, "agent is not root at the island")?;

        let events = world.viewer(agent)?.events();
        ensure(events.contains(&ViewerEvent::EnableSimulator(island)), "no EnableSimulator for a far target")?;
        ensure(events.contains(&ViewerEvent::TeleportFinish(island)), "no TeleportFinish sent")
    }

    // ========================================================================
    // DST-003: Teleport near
    // ========================================================================

    async fn teleport_near(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let target = world.host(world.block_region(0, 0))?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        let child_before = target
            .region
            .presence(agent)
            .ok_or_else(|| SimError::check("no child agent in the target before the teleport"))?;

        let report = Self::teleport(
            &center,
            agent,
            TargetRef::Handle(target.region.info().handle()),
            Position::new(128.0, 128.0, 30.0),
        )
        .await??;
        world.settle(SETTLE).await;

        ensure(
            matches!(report.outcome, HandoffOutcome::Arrived { closed_source: false, .. }),
            format!("near teleport closed the source: {:?}", report.outcome),
        )?;
        ensure(Self::is_child(&center, agent), "source is not a child after a near teleport")?;
        ensure(Self::is_root(&target, agent), "agent is not root at the target")?;
        let child_after = target
            .region
            .presence(agent)
            .ok_or_else(|| SimError::check("target lost the presence"))?;
        ensure(Arc::ptr_eq(&child_before, &child_after), "target replaced its child agent instead of refreshing it")
    }

    // ========================================================================
    // DST-004: Destination missing
    // ========================================================================

    async fn destination_missing(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        let viewer = world.viewer(agent)?;
        let session = world.root_session(agent)?;
        let events_before = viewer.events();
        let state_before = session.state();
        let calls_before = world.network.stats();

        let result = center
            .coordinator
            .request_teleport(
                agent,
                TargetRef::Name("Atlantis".to_string()),
                Self::center_position(),
                Position::new(1.0, 0.0, 0.0),
                TeleportFlags::VIA_LOCATION,
            )
            .await;
        let err = match result {
            Err(e @ TransferError::DestinationNotFound(_)) => e,
            other => return Err(SimError::check(format!("expected DestinationNotFound, got {:?}", other))),
        };

        let mut expected = events_before;
        expected.push(ViewerEvent::TeleportFailed(err.user_message()));
        ensure(viewer.events() == expected, format!("unexpected viewer traffic: {:?}", viewer.events()))?;
        ensure(session.state() == state_before, "session state changed")?;
        ensure(world.network.stats() == calls_before, "a remote region was contacted")?;
        ensure(!center.coordinator.tracker().is_pending(agent), "failed request left a migration pending")
    }

    // ========================================================================
    // DST-005: Destination refused
    // ========================================================================

    async fn destination_refused(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let island = world.host(world.island())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        world
            .network
            .controller()
            .refuse(RemoteCall::CreateAgent, world.island(), "Region is full");

        let result = Self::teleport(&center, agent, TargetRef::Name("Island".to_string()), Self::center_position()).await?;
        let err = match result {
            Err(e @ TransferError::DestinationRejected(_)) => e,
            other => return Err(SimError::check(format!("expected DestinationRejected, got {:?}", other))),
        };

        ensure(island.region.presence(agent).is_none(), "refusing region holds a presence")?;
        ensure(Self::is_root(&center, agent), "source lost authority")?;
        ensure(
            world.viewer(agent)?.events().contains(&ViewerEvent::TeleportFailed(err.user_message())),
            "viewer not told about the refusal",
        )
    }

    // ========================================================================
    // DST-006: Update refused
    // ========================================================================

    async fn update_refused(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let island = world.host(world.island())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        world
            .network
            .controller()
            .refuse(RemoteCall::UpdateAgent, world.island(), "Snapshot refused");

        let result = Self::teleport(&center, agent, TargetRef::Name("Island".to_string()), Self::center_position()).await?;
        ensure(
            matches!(result, Err(TransferError::HandoffFailed(_))),
            format!("expected HandoffFailed, got {:?}", result),
        )?;
        world.settle(SETTLE).await;

        ensure(island.region.presence(agent).is_none(), "fresh remote session was not closed")?;
        ensure(Self::is_root(&center, agent), "source lost authority")
    }

    // ========================================================================
    // DST-007: Cancel mid-flight
    // ========================================================================

    async fn cancel_mid_flight(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let island = world.host(world.island())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        let seeds_before = Self::seed_regions(world, agent);
        world.viewer(agent)?.set_confirms_arrival(false);

        let outcome = center
            .coordinator
            .request_teleport(
                agent,
                TargetRef::Name("Island".to_string()),
                Self::center_position(),
                Position::new(1.0, 0.0, 0.0),
                TeleportFlags::VIA_LOCATION,
            )
            .await?;
        let handle = Self::remote(outcome)?;
        Self::wait_in_transit(world, &center, agent).await?;

        ensure(center.coordinator.request_cancel(agent), "cancel refused")?;
        let result = handle.outcome().await;
        ensure(
            result == Err(TransferError::Canceled),
            format!("expected Canceled, got {:?}", result),
        )?;
        world.settle(SETTLE).await;

        ensure(Self::is_root(&center, agent), "source not restored")?;
        ensure(island.region.presence(agent).is_none(), "abandoned destination kept a presence")?;
        ensure(Self::seed_regions(world, agent) == seeds_before, "neighbor seeds not restored")
    }

    // ========================================================================
    // DST-008: Callback timeout
    // ========================================================================

    async fn callback_timeout(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let island = world.host(world.island())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        let seeds_before = Self::seed_regions(world, agent);
        world.viewer(agent)?.set_confirms_arrival(false);

        let started = world.elapsed_secs();
        let result = Self::teleport(&center, agent, TargetRef::Name("Island".to_string()), Self::center_position()).await?;
        ensure(
            result == Err(TransferError::CallbackTimeout),
            format!("expected CallbackTimeout, got {:?}", result),
        )?;
        let waited = world.elapsed_secs() - started;
        ensure(
            waited >= world.config.transfer.confirmation_timeout().as_secs_f64(),
            format!("gave up after {:.1}s", waited),
        )?;
        world.settle(SETTLE).await;

        ensure(Self::is_root(&center, agent), "source not restored")?;
        ensure(island.region.presence(agent).is_none(), "timed-out destination kept a presence")?;
        ensure(Self::seed_regions(world, agent) == seeds_before, "neighbor seeds not restored")
    }

    // ========================================================================
    // DST-009: Reconnect race
    // ========================================================================

    async fn reconnect_race(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let island = world.island();
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        world.viewer(agent)?.set_confirms_arrival(false);

        let outcome = center
            .coordinator
            .request_teleport(
                agent,
                TargetRef::Name("Island".to_string()),
                Self::center_position(),
                Position::new(1.0, 0.0, 0.0),
                TeleportFlags::VIA_LOCATION,
            )
            .await?;
        let handle = Self::remote(outcome)?;
        Self::wait_in_transit(world, &center, agent).await?;

        world.reconnect(agent, world.center(), island)?;
        let report = handle.outcome().await?;
        ensure(
            report.outcome == HandoffOutcome::Superseded,
            format!("expected Superseded, got {:?}", report.outcome),
        )?;

        world.open_neighbors(agent).await?;
        world.settle(SETTLE).await;
        ensure(Self::root_handle(world, agent)? == island, "reconnected session lost authority")?;
        ensure(center.region.presence(agent).is_none(), "rollback resurrected the source")
    }

    // ========================================================================
    // DST-010: Object crossing
    // ========================================================================

    async fn object_crossing(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let west = world.host(world.block_region(0, 1))?;
        let east = world.block_region(2, 1);
        let owner = world.ids.agent(99);

        // Plain object drifts west
        let drifter = world.drop_object(world.center(), owner, Position::new(1.0, 50.0, 22.0), EdgeBehavior::default())?;
        let outcome = center.coordinator.cross_object(drifter, Position::new(-0.5, 50.0, 22.0)).await?;
        ensure(
            outcome == CrossingOutcome::Crossed(west.region.info().handle()),
            format!("drifter outcome {:?}", outcome),
        )?;
        let arrived = west
            .region
            .object(drifter)
            .ok_or_else(|| SimError::check("drifter missing in the west region"))?;
        ensure(
            arrived.position == Position::new(255.5, 50.0, 22.0),
            format!("drifter entered at {:?}", arrived.position),
        )?;
        ensure(center.region.object(drifter).is_none(), "drifter left a copy behind")?;

        let edge = |die_at_edge, return_at_edge| EdgeBehavior { die_at_edge, return_at_edge };

        let doomed = world.drop_object(world.center(), owner, Position::new(255.0, 50.0, 22.0), edge(true, false))?;
        let outcome = center.coordinator.cross_object(doomed, Position::new(256.5, 50.0, 22.0)).await?;
        ensure(outcome == CrossingOutcome::Deleted, format!("die-at-edge outcome {:?}", outcome))?;

        let homing = world.drop_object(world.center(), owner, Position::new(255.0, 60.0, 22.0), edge(false, true))?;
        let outcome = center.coordinator.cross_object(homing, Position::new(256.5, 60.0, 22.0)).await?;
        ensure(outcome == CrossingOutcome::Returned, format!("return-at-edge outcome {:?}", outcome))?;

        // Banned owner: the neighbor refuses, the object bounces back
        west.region.ban(owner);
        let start = Position::new(1.0, 70.0, 22.0);
        let bounced = world.drop_object(world.center(), owner, start, EdgeBehavior::default())?;
        let result = center.coordinator.cross_object(bounced, Position::new(-0.5, 70.0, 22.0)).await;
        ensure(
            matches!(result, Err(TransferError::ObjectCrossingFailed { .. })),
            format!("banned crossing gave {:?}", result),
        )?;
        Self::check_restored(&center, bounced, start)?;

        // Partitioned neighbor: same restoration
        world.network.controller().partition(east);
        let start = Position::new(255.0, 80.0, 22.0);
        let stranded = world.drop_object(world.center(), owner, start, EdgeBehavior::default())?;
        let result = center.coordinator.cross_object(stranded, Position::new(256.5, 80.0, 22.0)).await;
        world.network.controller().heal(east);
        ensure(
            matches!(result, Err(TransferError::ObjectCrossingFailed { .. })),
            format!("partitioned crossing gave {:?}", result),
        )?;
        Self::check_restored(&center, stranded, start)
    }

    fn check_restored(host: &RegionHost, object: gridwalk_env::ObjectId, start: Position) -> Result<(), SimError> {
        let restored = host
            .region
            .object(object)
            .ok_or_else(|| SimError::check(format!("object {} vanished after a failed crossing", object)))?;
        ensure(restored.position == start, format!("object restored to {:?}", restored.position))?;
        ensure(restored.crossing_failed, "crossing failure not flagged")
    }

    // ========================================================================
    // DST-011: Attachment carry
    // ========================================================================

    async fn attachment_carry(world: &SimWorld, oracle: &mut Oracle) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;
        for _ in 0..3 {
            world.wear(agent)?;
        }
        oracle.expect_attachments(agent, 3);

        let report = Self::teleport(&center, agent, TargetRef::Name("Island".to_string()), Self::center_position())
            .await??;
        let attachments = match report.outcome {
            HandoffOutcome::Arrived { attachments, .. } => attachments,
            other => return Err(SimError::check(format!("unexpected outcome {:?}", other))),
        };
        ensure(attachments.migrated.len() == 3, format!("{} attachments migrated", attachments.migrated.len()))?;
        ensure(attachments.failed.is_empty(), format!("attachment failures: {:?}", attachments.failed))?;
        ensure(
            center.region.objects().iter().all(|o| !o.is_attachment),
            "attachments left in the source region",
        )
    }

    // ========================================================================
    // DST-012: Concurrent trigger
    // ========================================================================

    async fn concurrent_trigger(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;

        let first = center
            .coordinator
            .request_teleport(
                agent,
                TargetRef::Name("Island".to_string()),
                Self::center_position(),
                Position::new(1.0, 0.0, 0.0),
                TeleportFlags::VIA_LOCATION,
            )
            .await?;
        let first = Self::remote(first)?;

        let second = center
            .coordinator
            .request_teleport(
                agent,
                TargetRef::Handle(world.block_region(0, 0)),
                Self::center_position(),
                Position::new(1.0, 0.0, 0.0),
                TeleportFlags::VIA_LOCATION,
            )
            .await;
        ensure(
            matches!(second, Err(TransferError::TransferInProgress(a)) if a == agent),
            format!("second trigger gave {:?}", second),
        )?;

        let report = first.outcome().await?;
        ensure(report.destination == world.island(), "first migration went astray")?;
        ensure(Self::root_handle(world, agent)? == world.island(), "first migration did not complete")
    }

    // ========================================================================
    // DST-013: Partitioned neighbor
    // ========================================================================

    async fn partitioned_neighbor(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let east = world.block_region(2, 1);
        let west = world.block_region(0, 1);
        world.network.controller().partition(east);

        let agent = world.login(1, world.center(), Position::new(1.0, 40.0, 25.0))?;
        let update = world.open_neighbors(agent).await?;
        world.settle(SETTLE).await;

        ensure(update.informed.len() == 8, format!("{} neighbors informed", update.informed.len()))?;
        ensure(world.host(east)?.region.presence(agent).is_none(), "partitioned neighbor holds a child")?;
        let children = world
            .network
            .hosts()
            .iter()
            .filter(|h| Self::is_child(h, agent))
            .count();
        ensure(children == 7, format!("{} child agents opened", children))?;

        let report = center
            .coordinator
            .notify_crossed_border(agent, Position::new(0.05, 40.0, 25.0), false)
            .await?
            .outcome()
            .await?;
        world.settle(SETTLE).await;
        world.network.controller().heal(east);

        ensure(report.destination == west, "crossing went astray")?;
        ensure(Self::root_handle(world, agent)? == west, "agent is not root west")
    }

    // ========================================================================
    // DST-014: Home teleport
    // ========================================================================

    async fn home_teleport(world: &SimWorld) -> Result<(), SimError> {
        let center = world.host(world.center())?;
        let agent = Self::arrive(world, 1, world.center(), Self::center_position()).await?;

        let outcome = center.coordinator.request_teleport_home(agent).await?;
        let report = Self::remote(outcome)?.outcome().await?;
        world.settle(SETTLE).await;

        ensure(report.destination == world.island(), format!("went home to {}", report.destination))?;
        ensure(world.viewer(agent)?.events().contains(&ViewerEvent::TeleportStart), "no TeleportStart sent")?;
        let position = world.root_session(agent)?.position();
        ensure(
            position == Position::new(128.0, 128.0, 25.0),
            format!("arrived home at {:?}", position),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_passes(scenario: ScenarioId) {
        let result = ScenarioRunner::new(42).run(scenario);
        assert!(
            result.passed,
            "{} failed: {:?} {:?}",
            scenario,
            result.failure_reason,
            result.violations
        );
    }

    #[test]
    fn test_walk_west_scenario() {
        assert_passes(ScenarioId::WalkWest);
    }

    #[test]
    fn test_teleport_far_scenario() {
        assert_passes(ScenarioId::TeleportFar);
    }

    #[test]
    fn test_destination_missing_scenario() {
        assert_passes(ScenarioId::DestinationMissing);
    }

    #[test]
    fn test_callback_timeout_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::CallbackTimeout);

        assert!(result.passed, "{:?}", result.failure_reason);
        // Default confirmation timeout plus the settle periods
        assert!(result.final_time_secs >= 20.0);
    }

    #[test]
    fn test_attachment_carry_scenario() {
        assert_passes(ScenarioId::AttachmentCarry);
    }

    #[test]
    fn test_object_crossing_scenario() {
        assert_passes(ScenarioId::ObjectCrossing);
    }

    #[test]
    fn test_scenarios_without_event_queue() {
        let runner = ScenarioRunner::new(7).with_event_queue(false);

        let result = runner.run(ScenarioId::TeleportNear);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.viewer_events > 0);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let a = ScenarioRunner::new(1234).run(ScenarioId::CancelMidFlight);
        let b = ScenarioRunner::new(1234).run(ScenarioId::CancelMidFlight);

        assert_eq!(a.passed, b.passed);
        assert_eq!(a.final_time_secs, b.final_time_secs);
        assert_eq!(a.metrics, b.metrics);
    }
}
