//! ObjectCrossing - moves free-standing objects over region borders.

use crate::destination::DestinationNegotiator;
use crate::error::TransferError;
use crate::services::Scene;
use gridwalk_env::{CreateObjectRequest, ObjectId, Position, RegionHandle, SimulationService};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to an object that left the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingOutcome {
    /// Die-at-edge object deleted
    Deleted,
    /// Return-at-edge object sent back to its owner
    Returned,
    /// Now hosted by the neighbor
    Crossed(RegionHandle),
}

pub struct ObjectCrossing {
    scene: Arc<dyn Scene>,
    simulation: Arc<dyn SimulationService>,
    negotiator: Arc<DestinationNegotiator>,
}

impl ObjectCrossing {
    pub fn new(
        scene: Arc<dyn Scene>,
        simulation: Arc<dyn SimulationService>,
        negotiator: Arc<DestinationNegotiator>,
    ) -> Self {
        Self {
            scene,
            simulation,
            negotiator,
        }
    }

    /// Handles an object whose new position lies outside the region.
    ///
    /// On failure the object is put back where it was, so it never vanishes
    /// from the world.
    pub async fn cross(&self, id: ObjectId, new_position: Position) -> Result<CrossingOutcome, TransferError> {
        let object = self.scene.object(id).ok_or_else(|| TransferError::ObjectCrossingFailed {
            object: id,
            reason: "object is not in the scene".to_string(),
        })?;

        if object.is_attachment {
            return Err(TransferError::ObjectCrossingFailed {
                object: id,
                reason: "attachments cross with their wearer".to_string(),
            });
        }

        if object.edge.die_at_edge {
            self.scene.delete_object(id);
            debug!(object = %id, "Die-at-edge object deleted");
            return Ok(CrossingOutcome::Deleted);
        }
        if object.edge.return_at_edge {
            self.scene.return_object(id);
            debug!(object = %id, owner = %object.owner_id, "Return-at-edge object returned");
            return Ok(CrossingOutcome::Returned);
        }

        if !(new_position.x.is_finite() && new_position.y.is_finite() && new_position.z.is_finite()) {
            return Err(self.fail(id, object.position, "position is not finite".to_string()));
        }

        let source = self.scene.region();
        let (dx, dy, local) = self.negotiator.object_offset(new_position);
        if (dx, dy) == (0, 0) {
            debug!(object = %id, "Object still inside the region; nothing to cross");
            return Err(TransferError::ObjectCrossingFailed {
                object: id,
                reason: "object has not left the region".to_string(),
            });
        }
        let Some(neighbor) = self.negotiator.neighbor_at(&source, dx, dy).await else {
            return Err(self.fail(id, object.position, "no region beyond the border".to_string()));
        };

        let mut moved = object.clone();
        moved.position = local;
        match self
            .simulation
            .create_object(&neighbor, CreateObjectRequest::Object(moved))
            .await
        {
            Ok(()) => {
                self.scene.delete_object(id);
                debug!(object = %id, region = %neighbor.handle(), "Object crossed");
                Ok(CrossingOutcome::Crossed(neighbor.handle()))
            }
            Err(e) => Err(self.fail(id, object.position, e.reason())),
        }
    }

    fn fail(&self, id: ObjectId, old_position: Position, reason: String) -> TransferError {
        self.scene.set_object_position(id, old_position);
        self.scene.mark_crossing_failed(id);
        self.scene.schedule_full_update(id);
        warn!(object = %id, reason = %reason, "Object crossing failed; position restored");
        TransferError::ObjectCrossingFailed { object: id, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, SimCall};
    use gridwalk_env::{AgentId, EdgeBehavior, SceneObject};

    fn object(seed: u64, edge: EdgeBehavior) -> SceneObject {
        SceneObject {
            id: ObjectId::from_seed(seed),
            name: "crate".to_string(),
            owner_id: AgentId::from_seed(9),
            position: Position::new(1.0, 50.0, 22.0),
            attached_position: Position::zeros(),
            attach_point: 0,
            from_item: None,
            parent_local_id: 0,
            is_attachment: false,
            edge,
            crossing_failed: false,
        }
    }

    fn crossing(fixture: &Fixture) -> ObjectCrossing {
        let negotiator = Arc::new(DestinationNegotiator::new(fixture.grid.clone(), fixture.config.clone()));
        ObjectCrossing::new(fixture.scene.clone(), fixture.simulation.clone(), negotiator)
    }

    #[tokio::test]
    async fn test_object_crosses_into_neighbor_frame() {
        let fixture = Fixture::new();
        fixture.scene.add_object(object(1, EdgeBehavior::default()));

        let outcome = crossing(&fixture)
            .cross(ObjectId::from_seed(1), Position::new(-0.5, 50.0, 22.0))
            .await
            .unwrap();

        assert_eq!(outcome, CrossingOutcome::Crossed(fixture.west.handle()));
        assert!(fixture.scene.object(ObjectId::from_seed(1)).is_none());
        match fixture.simulation.calls().as_slice() {
            [SimCall::Object { request: CreateObjectRequest::Object(sent), .. }] => {
                assert_eq!(sent.position, Position::new(255.5, 50.0, 22.0));
            }
            other => panic!("unexpected calls: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_crossing_restores_position() {
        let fixture = Fixture::new();
        fixture.scene.add_object(object(1, EdgeBehavior::default()));
        fixture.simulation.reject_object.lock().insert(fixture.west.handle());

        let err = crossing(&fixture)
            .cross(ObjectId::from_seed(1), Position::new(-0.5, 50.0, 22.0))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ObjectCrossingFailed { .. }));
        let kept = fixture.scene.object(ObjectId::from_seed(1)).unwrap();
        assert_eq!(kept.position, Position::new(1.0, 50.0, 22.0));
        assert!(kept.crossing_failed);
        assert_eq!(*fixture.scene.full_updates.lock(), vec![ObjectId::from_seed(1)]);
    }

    #[tokio::test]
    async fn test_edge_flags() {
        let fixture = Fixture::new();
        fixture.scene.add_object(object(1, EdgeBehavior { die_at_edge: true, return_at_edge: false }));
        fixture.scene.add_object(object(2, EdgeBehavior { die_at_edge: false, return_at_edge: true }));
        let crossing = crossing(&fixture);

        let died = crossing.cross(ObjectId::from_seed(1), Position::new(-1.0, 5.0, 5.0)).await.unwrap();
        let returned = crossing.cross(ObjectId::from_seed(2), Position::new(-1.0, 5.0, 5.0)).await.unwrap();

        assert_eq!(died, CrossingOutcome::Deleted);
        assert_eq!(returned, CrossingOutcome::Returned);
        assert_eq!(*fixture.scene.returned.lock(), vec![ObjectId::from_seed(2)]);
        assert!(fixture.simulation.calls().is_empty());
    }

    #[tokio::test]
    async fn test_runaway_position_is_restored() {
        let fixture = Fixture::new();
        fixture.scene.add_object(object(1, EdgeBehavior::default()));
        fixture.scene.add_object(object(2, EdgeBehavior::default()));
        let crossing = crossing(&fixture);

        let infinite = crossing
            .cross(ObjectId::from_seed(1), Position::new(f32::INFINITY, 50.0, 22.0))
            .await
            .unwrap_err();
        let huge = crossing
            .cross(ObjectId::from_seed(2), Position::new(-3.0e38, 50.0, 22.0))
            .await
            .unwrap_err();

        assert!(matches!(infinite, TransferError::ObjectCrossingFailed { .. }));
        assert!(matches!(huge, TransferError::ObjectCrossingFailed { .. }));
        for seed in [1, 2] {
            let kept = fixture.scene.object(ObjectId::from_seed(seed)).unwrap();
            assert_eq!(kept.position, Position::new(1.0, 50.0, 22.0));
            assert!(kept.crossing_failed);
        }
        assert!(fixture.simulation.calls().is_empty());
    }

    #[tokio::test]
    async fn test_object_inside_region_is_left_alone() {
        let fixture = Fixture::new();
        fixture.scene.add_object(object(1, EdgeBehavior::default()));

        let err = crossing(&fixture)
            .cross(ObjectId::from_seed(1), Position::new(100.0, 50.0, 22.0))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ObjectCrossingFailed { .. }));
        let kept = fixture.scene.object(ObjectId::from_seed(1)).unwrap();
        assert_eq!(kept.position, Position::new(1.0, 50.0, 22.0));
        assert!(!kept.crossing_failed);
        assert!(fixture.simulation.calls().is_empty());
    }

    #[tokio::test]
    async fn test_crossing_into_void_keeps_object() {
        let fixture = Fixture::new();
        let mut lonely = object(1, EdgeBehavior::default());
        lonely.position = Position::new(255.0, 50.0, 22.0);
        fixture.scene.add_object(lonely);

        // Two regions east of center is outside the test grid
        let err = crossing(&fixture)
            .cross(ObjectId::from_seed(1), Position::new(513.0, 50.0, 22.0))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ObjectCrossingFailed { .. }));
        assert_eq!(
            fixture.scene.object(ObjectId::from_seed(1)).unwrap().position,
            Position::new(255.0, 50.0, 22.0)
        );
    }
}
