//! Payloads exchanged between regions and pushed to viewers.
//!
//! These are transport-agnostic: the production HTTP layer serializes them
//! with serde, the simulator hands them over in memory.

use crate::types::{AgentId, ItemId, ObjectId, RegionHandle, RegionId, SessionId};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Region-local position or direction in meters.
pub type Position = Vector3<f32>;

/// Control flag set on snapshots of flying avatars.
pub const AGENT_CONTROL_FLY: u32 = 0x0000_2000;

/// Teleport flag bit set, as understood by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TeleportFlags(pub u32);

impl TeleportFlags {
    pub const DEFAULT: Self = Self(0);
    pub const SET_HOME_TO_TARGET: Self = Self(1 << 0);
    pub const SET_LAST_TO_TARGET: Self = Self(1 << 1);
    pub const VIA_LURE: Self = Self(1 << 2);
    pub const VIA_LANDMARK: Self = Self(1 << 3);
    pub const VIA_LOCATION: Self = Self(1 << 4);
    pub const VIA_HOME: Self = Self(1 << 5);
    pub const VIA_TELEHUB: Self = Self(1 << 6);
    pub const VIA_LOGIN: Self = Self(1 << 7);
    pub const VIA_GODLIKE_LURE: Self = Self(1 << 8);
    pub const GODLIKE: Self = Self(1 << 9);
    pub const NINE_ONE_ONE: Self = Self(1 << 10);
    pub const DISABLE_CANCEL: Self = Self(1 << 11);
    pub const VIA_REGION_ID: Self = Self(1 << 12);
    pub const IS_FLYING: Self = Self(1 << 13);

    /// True if every bit of `other` is set.
    pub fn contains(&self, other: TeleportFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TeleportFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Appearance data carried with a session between regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarAppearance {
    /// Avatar height in meters, used for terrain clamping
    pub avatar_height: f32,

    /// Attach point per inventory item worn
    pub attach_points: BTreeMap<ItemId, u8>,

    /// Opaque visual parameters (baked texture ids, sliders, ...)
    pub visual_params: Vec<u8>,
}

impl Default for AvatarAppearance {
    fn default() -> Self {
        Self {
            avatar_height: 1.9,
            attach_points: BTreeMap::new(),
            visual_params: Vec::new(),
        }
    }
}

/// Authorization and appearance bundle that admits a session into a region.
///
/// Built once per migration attempt (or per neighbor notification) and
/// never mutated after it has been sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCircuit {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub circuit_code: u32,
    pub first_name: String,
    pub last_name: String,

    /// Starting position inside the receiving region
    pub start_position: Position,

    /// True when the receiving region should create a child (shadow) agent
    pub child: bool,

    pub appearance: AvatarAppearance,

    /// Capability object path for the receiving region
    pub caps_path: String,

    /// Every capability seed the agent currently holds, by region
    pub children_seeds: BTreeMap<RegionHandle, String>,

    /// Home, inventory, asset... service URLs of the user's grid
    pub service_urls: HashMap<String, String>,

    pub ip_address: String,
    pub viewer: String,
    pub channel: String,
    pub mac: String,
    pub id0: String,
}

/// Full snapshot of agent state pushed to the destination before hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub session_id: SessionId,

    /// Region sending the snapshot
    pub source_region: RegionId,

    pub position: Position,
    pub velocity: Position,
    pub look_at: Position,
    pub control_flags: u32,
    pub draw_distance: f32,
    pub appearance: AvatarAppearance,

    /// URL the destination calls once the viewer has arrived
    pub callback_uri: Option<String>,
}

impl AgentSnapshot {
    /// True when the snapshot marks the avatar as flying.
    pub fn is_flying(&self) -> bool {
        self.control_flags & AGENT_CONTROL_FLY != 0
    }
}

/// Edge behaviour flags of a free-standing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeBehavior {
    pub die_at_edge: bool,
    pub return_at_edge: bool,
}

/// Serializable scene object group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: ObjectId,
    pub name: String,
    pub owner_id: AgentId,

    /// Group position (absolute in the hosting region)
    pub position: Position,

    /// Offset from the attach point while worn
    pub attached_position: Position,

    /// Attach point; 0 when not attached
    pub attach_point: u8,

    /// Inventory item the object was rezzed from
    pub from_item: Option<ItemId>,

    /// Local id of the avatar the object is parented to; 0 when free
    pub parent_local_id: u32,

    pub is_attachment: bool,
    pub edge: EdgeBehavior,

    /// Set on the physical actor when a crossing attempt failed
    pub crossing_failed: bool,
}

/// Re-creation request sent to a destination region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CreateObjectRequest {
    /// Full object state (free-standing objects)
    Object(SceneObject),

    /// Rez from the owner's inventory (attachments)
    FromInventory { owner: AgentId, item: ItemId },
}

/// "Teleport finished" event pushed to the viewer via the event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportFinish {
    pub agent_id: AgentId,
    pub destination: RegionHandle,
    pub endpoint: SocketAddr,
    pub seed_url: String,
    pub flags: TeleportFlags,
    pub source: RegionHandle,
}

/// "Cross region" event pushed to the viewer when walking across a border.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRegion {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub destination: RegionHandle,
    pub position: Position,
    pub velocity: Position,
    pub endpoint: SocketAddr,
    pub seed_url: String,
    pub source: RegionHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teleport_flags_combine() {
        let flags = TeleportFlags::SET_LAST_TO_TARGET | TeleportFlags::VIA_HOME;

        assert!(flags.contains(TeleportFlags::VIA_HOME));
        assert!(flags.contains(TeleportFlags::SET_LAST_TO_TARGET));
        assert!(!flags.contains(TeleportFlags::VIA_LANDMARK));
    }

    #[test]
    fn test_snapshot_survives_json() {
        let snapshot = AgentSnapshot {
            agent_id: AgentId::from_seed(1),
            session_id: SessionId::from_seed(2),
            source_region: RegionId::from_seed(3),
            position: Position::new(1.0, 2.0, 3.0),
            velocity: Position::zeros(),
            look_at: Position::new(0.0, 1.0, 0.0),
            control_flags: AGENT_CONTROL_FLY,
            draw_distance: 64.0,
            appearance: AvatarAppearance::default(),
            callback_uri: Some("http://a:1/agent/x/y/release/".to_string()),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: AgentSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, snapshot);
        assert!(decoded.is_flying());
    }
}
