//! DestinationNegotiator - target resolution and position corrections.
//!
//! Resolves handles, names and landmarks to grid regions, applies the
//! grid's redirect rules, and owns the border geometry: which edge a
//! position has crossed, where it lands in the neighbor's frame, and how
//! a same-region target is clamped to the terrain.

use crate::config::TransferConfig;
use crate::error::TransferError;
use gridwalk_env::{GridService, Position, RegionHandle, RegionId, RegionInfo};
use std::sync::Arc;

const REGION_GONE: &str = "The region you tried to teleport to doesn't exist anymore";
const LANDMARK_GONE: &str = "The teleport destination could not be found.";

/// Abstract teleport target.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRef {
    Handle(RegionHandle),
    Name(String),
    Landmark(RegionId),
}

/// Edge(s) a position has crossed, as a unit step in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderCrossing {
    pub dx: i32,
    pub dy: i32,
}

/// A negotiated destination ready for hand-off.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub region: RegionInfo,

    /// Position in the destination's local frame
    pub position: Position,

    /// True when the destination is out of the source's shadow range
    pub is_far: bool,
}

pub struct DestinationNegotiator {
    grid: Arc<dyn GridService>,
    config: TransferConfig,
}

impl DestinationNegotiator {
    pub fn new(grid: Arc<dyn GridService>, config: TransferConfig) -> Self {
        Self { grid, config }
    }

    /// Looks up the region a target refers to.
    pub async fn resolve(&self, target: &TargetRef) -> Result<RegionInfo, TransferError> {
        let found = match target {
            TargetRef::Handle(handle) => self.grid.region_by_handle(*handle).await,
            TargetRef::Name(name) => self.grid.region_by_name(name).await,
            TargetRef::Landmark(id) => self.grid.region_by_id(*id).await,
        };

        found.ok_or_else(|| {
            let message = match target {
                TargetRef::Handle(_) => REGION_GONE.to_string(),
                TargetRef::Name(name) => format!("The region '{}' could not be found.", name),
                TargetRef::Landmark(_) => LANDMARK_GONE.to_string(),
            };
            TransferError::DestinationNotFound(message)
        })
    }

    /// Applies redirect rules and validates the final destination.
    pub async fn negotiate(
        &self,
        source: &RegionInfo,
        region: RegionInfo,
        position: Position,
    ) -> Result<Destination, TransferError> {
        let region = self.grid.final_destination(&region).await.ok_or_else(|| {
            TransferError::DestinationNotFound(
                "Final destination is having problems. Unable to teleport agent.".to_string(),
            )
        })?;

        if region.same_location(source) {
            return Err(TransferError::InvalidSelfTarget);
        }

        Ok(Destination {
            is_far: self.is_outside_view(source, &region),
            region,
            position,
        })
    }

    /// True when `other` is beyond the configured view range of `region`.
    pub fn is_outside_view(&self, region: &RegionInfo, other: &RegionInfo) -> bool {
        let dx = (region.grid_x as i64 - other.grid_x as i64).unsigned_abs();
        let dy = (region.grid_y as i64 - other.grid_y as i64).unsigned_abs();
        dx.max(dy) > self.config.view_range_regions as u64
    }

    /// Detects which border(s) a position is about to cross.
    pub fn detect_border(&self, position: Position) -> Option<BorderCrossing> {
        let size = self.config.region_size as f32;
        let b = self.config.boundary_distance;

        let dx = if position.x - b < 0.0 {
            -1
        } else if position.x + b > size {
            1
        } else {
            0
        };
        let dy = if position.y - b < 0.0 {
            -1
        } else if position.y + b > size {
            1
        } else {
            0
        };

        if dx == 0 && dy == 0 {
            None
        } else {
            Some(BorderCrossing { dx, dy })
        }
    }

    /// Re-expresses a crossing position in the neighbor's local frame.
    ///
    /// The crossed axis lands `enter_distance` inside the opposite edge; the
    /// other axis and Z are kept.
    pub fn entry_position(&self, crossing: BorderCrossing, position: Position) -> Position {
        let size = self.config.region_size as f32;
        let e = self.config.enter_distance;
        let mut entry = position;

        match crossing.dx {
            -1 => entry.x = size - e,
            1 => entry.x = e,
            _ => {}
        }
        match crossing.dy {
            -1 => entry.y = size - e,
            1 => entry.y = e,
            _ => {}
        }
        entry
    }

    /// Resolves the neighbor an agent walks into and its entry position.
    pub async fn crossing_target(
        &self,
        source: &RegionInfo,
        position: Position,
    ) -> Result<(Destination, BorderCrossing), TransferError> {
        let crossing = self
            .detect_border(position)
            .ok_or_else(|| TransferError::DestinationNotFound(REGION_GONE.to_string()))?;

        let region = self
            .neighbor_at(source, crossing.dx as i64, crossing.dy as i64)
            .await
            .ok_or_else(|| TransferError::DestinationNotFound(REGION_GONE.to_string()))?;
        let destination = self
            .negotiate(source, region, self.entry_position(crossing, position))
            .await?;

        Ok((destination, crossing))
    }

    /// Region at a grid offset from `source`, if the grid has one there.
    pub async fn neighbor_at(&self, source: &RegionInfo, dx: i64, dy: i64) -> Option<RegionInfo> {
        let x = (source.grid_x as i64).checked_add(dx)?;
        let y = (source.grid_y as i64).checked_add(dy)?;
        if x < 0 || y < 0 || x > u32::MAX as i64 || y > u32::MAX as i64 {
            return None;
        }
        let handle = RegionHandle::from_grid(x as u32, y as u32, source.size);
        self.grid.region_by_handle(handle).await
    }

    /// Grid offset and local position of an object that left the region.
    ///
    /// Unlike agents, objects keep their exact overshoot: a position of
    /// -0.3 lands at `size - 0.3` in the western neighbor.
    pub fn object_offset(&self, position: Position) -> (i64, i64, Position) {
        let size = self.config.region_size as f32;
        let dx = (position.x / size).floor();
        let dy = (position.y / size).floor();
        let local = Position::new(position.x - dx * size, position.y - dy * size, position.z);
        (dx as i64, dy as i64, local)
    }

    /// Shifts a handle-addressed position into the current region's frame.
    ///
    /// Returns `Some` when the world point it names lies inside `current`.
    pub fn shift_into(
        &self,
        current: &RegionInfo,
        handle: RegionHandle,
        position: Position,
    ) -> Option<Position> {
        let size = current.size as f64;
        let local_x = handle.world_x() as f64 + position.x as f64 - current.world_x() as f64;
        let local_y = handle.world_y() as f64 + position.y as f64 - current.world_y() as f64;

        if (0.0..size).contains(&local_x) && (0.0..size).contains(&local_y) {
            Some(Position::new(local_x as f32, local_y as f32, position.z))
        } else {
            None
        }
    }

    /// Corrects a same-region teleport target.
    ///
    /// Illegal targets become the emergency position. Otherwise Z is lifted
    /// onto the terrain when the terrain lies within half an avatar height
    /// below the requested Z.
    pub fn local_position<F>(&self, position: Position, avatar_height: f32, terrain: F) -> Position
    where
        F: Fn(f32, f32) -> f32,
    {
        let size = self.config.region_size as f32;
        let legal = position.iter().all(|v| v.is_finite())
            && (0.0..=size).contains(&position.x)
            && (0.0..=size).contains(&position.y)
            && position.z >= 0.0;
        if !legal {
            return self.config.emergency_position();
        }

        let height = if avatar_height > 0.0 {
            avatar_height
        } else {
            self.config.default_avatar_height
        };
        let half_height = height / 2.0;

        let inside = position.x > 0.0 && position.x <= size && position.y > 0.0 && position.y <= size;
        let limit = if inside {
            terrain(position.x, position.y)
        } else {
            self.config.fallback_terrain_height
        };

        let lifted = limit + half_height;
        let mut corrected = position;
        if limit >= position.z - half_height && lifted.is_finite() {
            corrected.z = lifted;
        }
        corrected
    }
}
