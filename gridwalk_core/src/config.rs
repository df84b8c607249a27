//! Tunables of the migration protocol.
//!
//! Every delay and geometric constant the hand-off depends on is a field
//! here rather than a literal in the state machine, so deployments with
//! different network characteristics can adjust them without code changes.

use gridwalk_env::Position;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the TransferCoordinator and its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Region edge length in meters (default: 256)
    pub region_size: u32,

    /// Distance from an edge at which a border crossing triggers (default: 1.7 m)
    pub boundary_distance: f32,

    /// Inset from the edge at which a crossing agent enters the neighbor (default: 0.5 m)
    pub enter_distance: f32,

    /// How long to wait for the destination's arrival callback (default: 20 s)
    pub confirmation_timeout_ms: u64,

    /// Pause between EnableSimulator and EstablishAgentCommunication (default: 200 ms)
    pub enable_simulator_delay_ms: u64,

    /// Pause before informing a neighbor, letting prior closures settle (default: 500 ms)
    pub neighbor_inform_delay_ms: u64,

    /// Grace period before closing a source session left out of view (default: 5 s)
    pub close_grace_delay_ms: u64,

    /// Chebyshev distance in regions still considered "in view" (default: 1)
    pub view_range_regions: u32,

    /// Discover neighbors by draw-distance bounding box instead of adjacency
    pub variable_region_sight: bool,

    /// Substituted for illegal same-region teleport targets
    pub emergency_position: [f32; 3],

    /// Position used when the user has no recorded home
    pub default_home_position: [f32; 3],

    /// Look-at used when the user has no recorded home
    pub default_home_look_at: [f32; 3],

    /// Start position written into child-agent circuits
    pub child_start_position: [f32; 3],

    /// Terrain limit assumed when the target X/Y cannot be sampled (default: 22 m)
    pub fallback_terrain_height: f32,

    /// Used for terrain clamping when a session carries no usable height
    pub default_avatar_height: f32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            region_size: 256,
            boundary_distance: 1.7,
            enter_distance: 0.5,
            confirmation_timeout_ms: 20_000,
            enable_simulator_delay_ms: 200,
            neighbor_inform_delay_ms: 500,
            close_grace_delay_ms: 5_000,
            view_range_regions: 1,
            variable_region_sight: false,
            emergency_position: [128.0, 128.0, 128.0],
            default_home_position: [128.0, 128.0, 25.0],
            default_home_look_at: [128.0, 128.0, 128.0],
            child_start_position: [128.0, 128.0, 70.0],
            fallback_terrain_height: 22.0,
            default_avatar_height: 1.9,
        }
    }
}

impl TransferConfig {
    /// Parses a configuration from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn enable_simulator_delay(&self) -> Duration {
        Duration::from_millis(self.enable_simulator_delay_ms)
    }

    pub fn neighbor_inform_delay(&self) -> Duration {
        Duration::from_millis(self.neighbor_inform_delay_ms)
    }

    pub fn close_grace_delay(&self) -> Duration {
        Duration::from_millis(self.close_grace_delay_ms)
    }

    pub fn emergency_position(&self) -> Position {
        Position::from(self.emergency_position)
    }

    pub fn default_home_position(&self) -> Position {
        Position::from(self.default_home_position)
    }

    pub fn default_home_look_at(&self) -> Position {
        Position::from(self.default_home_look_at)
    }

    pub fn child_start_position(&self) -> Position {
        Position::from(self.child_start_position)
    }
}
