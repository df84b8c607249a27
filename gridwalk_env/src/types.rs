//! Identifiers and region addressing shared by every gridwalk crate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Creates a deterministic identifier from a seed (for simulation).
            pub fn from_seed(seed: u64) -> Self {
                let mut bytes = [0u8; 16];
                bytes[0..8].copy_from_slice(&seed.to_le_bytes());
                bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
                Self(Uuid::from_bytes(bytes))
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Show first 8 chars for readability
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

uuid_id!(
    /// Identity of an avatar, stable across every region it visits.
    AgentId
);
uuid_id!(
    /// Identity of a region (independent of where it sits on the grid).
    RegionId
);
uuid_id!(
    /// Identity of a scene object group.
    ObjectId
);
uuid_id!(
    /// Inventory item an attachment was rezzed from.
    ItemId
);
uuid_id!(
    /// Login session of a viewer.
    SessionId
);

/// Grid-derived region address.
///
/// Packs the region's world-space origin in meters: the X origin in the high
/// 32 bits and the Y origin in the low 32 bits. Regions never move, so a
/// handle is stable for the lifetime of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionHandle(pub u64);

impl RegionHandle {
    /// Builds a handle from a world-space origin in meters.
    pub fn from_world(x: u32, y: u32) -> Self {
        Self(((x as u64) << 32) | y as u64)
    }

    /// Builds a handle from grid coordinates (in region units).
    pub fn from_grid(grid_x: u32, grid_y: u32, region_size: u32) -> Self {
        Self::from_world(grid_x * region_size, grid_y * region_size)
    }

    /// World-space X origin in meters.
    pub fn world_x(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// World-space Y origin in meters.
    pub fn world_y(&self) -> u32 {
        self.0 as u32
    }

    /// Grid coordinates (in region units) for the given region size.
    pub fn grid(&self, region_size: u32) -> (u32, u32) {
        (self.world_x() / region_size, self.world_y() / region_size)
    }
}

impl std::fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.world_x(), self.world_y())
    }
}

/// Directory entry for a region as published by the grid service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    /// Stable region identity
    pub id: RegionId,

    /// Human-readable name (unique on the grid, case-insensitive)
    pub name: String,

    /// Grid X coordinate in region units
    pub grid_x: u32,

    /// Grid Y coordinate in region units
    pub grid_y: u32,

    /// Edge length in meters
    pub size: u32,

    /// Host name advertised for HTTP services
    pub external_host: String,

    /// Port of the region's HTTP services
    pub http_port: u16,

    /// Resolved UDP endpoint the viewer connects to; `None` when the host
    /// cannot be resolved
    pub endpoint: Option<SocketAddr>,
}

impl RegionInfo {
    /// Returns the region's handle.
    pub fn handle(&self) -> RegionHandle {
        RegionHandle::from_grid(self.grid_x, self.grid_y, self.size)
    }

    /// World-space X origin in meters.
    pub fn world_x(&self) -> u32 {
        self.grid_x * self.size
    }

    /// World-space Y origin in meters.
    pub fn world_y(&self) -> u32 {
        self.grid_y * self.size
    }

    /// True when both regions sit on the same grid coordinates.
    pub fn same_location(&self, other: &RegionInfo) -> bool {
        self.grid_x == other.grid_x && self.grid_y == other.grid_y
    }

    /// Base URL of the region's HTTP services.
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.external_host, self.http_port)
    }

    /// Seed capability URL handed to the viewer for a capability path.
    pub fn caps_seed_url(&self, caps_path: &str) -> String {
        format!("{}/CAPS/{}0000/", self.http_base(), caps_path)
    }
}
