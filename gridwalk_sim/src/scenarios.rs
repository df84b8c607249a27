//! Migration scenarios for DST.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// DST-001: Walk across the west border into an open neighbor
    WalkWest,

    /// DST-002: Teleport out of view to the isolated region
    TeleportFar,

    /// DST-003: Teleport into a neighbor already holding a child agent
    TeleportNear,

    /// DST-004: Teleport to a region name the grid does not know
    DestinationMissing,

    /// DST-005: Destination refuses the circuit
    DestinationRefused,

    /// DST-006: Destination accepts the circuit but refuses the snapshot
    UpdateRefused,

    /// DST-007: User cancels while waiting for the viewer
    CancelMidFlight,

    /// DST-008: Viewer never arrives at the destination
    CallbackTimeout,

    /// DST-009: Viewer re-logs into the destination on its own
    ReconnectRace,

    /// DST-010: Free objects cross, die, return and bounce at borders
    ObjectCrossing,

    /// DST-011: Attachments travel with a teleporting wearer
    AttachmentCarry,

    /// DST-012: Second trigger while a migration is running
    ConcurrentTrigger,

    /// DST-013: One neighbor partitioned during child-agent fan-out
    PartitionedNeighbor,

    /// DST-014: Teleport home with no recorded home
    HomeTeleport,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::WalkWest,
            ScenarioId::TeleportFar,
            ScenarioId::TeleportNear,
            ScenarioId::DestinationMissing,
            ScenarioId::DestinationRefused,
            ScenarioId::UpdateRefused,
            ScenarioId::CancelMidFlight,
            ScenarioId::CallbackTimeout,
            ScenarioId::ReconnectRace,
            ScenarioId::ObjectCrossing,
            ScenarioId::AttachmentCarry,
            ScenarioId::ConcurrentTrigger,
            ScenarioId::PartitionedNeighbor,
            ScenarioId::HomeTeleport,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::WalkWest => "walk_west",
            ScenarioId::TeleportFar => "teleport_far",
            ScenarioId::TeleportNear => "teleport_near",
            ScenarioId::DestinationMissing => "destination_missing",
            ScenarioId::DestinationRefused => "destination_refused",
            ScenarioId::UpdateRefused => "update_refused",
            ScenarioId::CancelMidFlight => "cancel_mid_flight",
            ScenarioId::CallbackTimeout => "callback_timeout",
            ScenarioId::ReconnectRace => "reconnect_race",
            ScenarioId::ObjectCrossing => "object_crossing",
            ScenarioId::AttachmentCarry => "attachment_carry",
            ScenarioId::ConcurrentTrigger => "concurrent_trigger",
            ScenarioId::PartitionedNeighbor => "partitioned_neighbor",
            ScenarioId::HomeTeleport => "home_teleport",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::WalkWest => "Agent at x=0.05 walks west, enters the neighbor at S-0.5",
            ScenarioId::TeleportFar => "Teleport to a far region; source closed after the grace delay",
            ScenarioId::TeleportNear => "Teleport to a neighbor; source stays as a child agent",
            ScenarioId::DestinationMissing => "Unknown region name; only a failure message is sent",
            ScenarioId::DestinationRefused => "CreateAgent refused; no remote session is left behind",
            ScenarioId::UpdateRefused => "UpdateAgent refused; the fresh remote session is closed",
            ScenarioId::CancelMidFlight => "Cancel during confirmation; neighbors restored",
            ScenarioId::CallbackTimeout => "No arrival within the timeout; source authority restored",
            ScenarioId::ReconnectRace => "Independent reconnection during the wait; rollback skipped",
            ScenarioId::ObjectCrossing => "Loose objects offset into neighbors or restored on failure",
            ScenarioId::AttachmentCarry => "Three attachments follow the wearer; none stay behind",
            ScenarioId::ConcurrentTrigger => "Second teleport rejected while the first is running",
            ScenarioId::PartitionedNeighbor => "Unreachable neighbor does not block the others",
            ScenarioId::HomeTeleport => "No recorded home; grid default region is used",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        ScenarioId::all()
            .into_iter()
            .enumerate()
            .find(|(i, id)| {
                id.name() == wanted
                    || id.name().replace('_', "") == wanted
                    || format!("dst-{:03}", i + 1) == wanted
            })
            .map(|(_, id)| id)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}
