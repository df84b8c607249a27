//! AttachmentMigrator - carries worn objects along with their wearer.

use crate::error::TransferError;
use crate::services::Scene;
use crate::session::AgentSession;
use gridwalk_env::{CreateObjectRequest, ObjectId, RegionInfo, SimulationService};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-object results of an attachment migration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentReport {
    pub migrated: Vec<ObjectId>,

    /// Non-fatal failures; the objects stay behind as free objects
    pub failed: Vec<TransferError>,
}

pub struct AttachmentMigrator {
    scene: Arc<dyn Scene>,
    simulation: Arc<dyn SimulationService>,
}

impl AttachmentMigrator {
    pub fn new(scene: Arc<dyn Scene>, simulation: Arc<dyn SimulationService>) -> Self {
        Self { scene, simulation }
    }

    /// Re-creates every attachment of `session` at `destination`.
    ///
    /// The session ends up wearing nothing. A source copy is only deleted
    /// after the destination acknowledged its re-creation, so an object is
    /// never live in both regions.
    pub async fn migrate(&self, session: &AgentSession, destination: &RegionInfo) -> AttachmentReport {
        let owner = session.agent_id();
        let mut report = AttachmentReport::default();

        for mut object in session.take_attachments() {
            let id = object.id;
            self.scene.broadcast_kill(&[id]);

            object.parent_local_id = 0;
            object.position = object.attached_position;
            object.is_attachment = false;

            let request = match object.from_item {
                Some(item) => CreateObjectRequest::FromInventory { owner, item },
                None => CreateObjectRequest::Object(object.clone()),
            };

            match self.simulation.create_object(destination, request).await {
                Ok(()) => {
                    self.scene.delete_object(id);
                    debug!(object = %id, region = %destination.handle(), "Attachment crossed");
                    report.migrated.push(id);
                }
                Err(e) => {
                    self.scene.mark_crossing_failed(id);
                    warn!(
                        object = %id,
                        agent = %owner,
                        region = %destination.handle(),
                        error = %e,
                        "Attachment failed to cross"
                    );
                    report.failed.push(TransferError::AttachmentCrossingFailed {
                        object: id,
                        destination: destination.handle(),
                        reason: e.reason(),
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attachment, Fixture, SimCall};
    use gridwalk_env::Position;

    #[tokio::test]
    async fn test_attachments_move_and_source_is_emptied() {
        let fixture = Fixture::new();
        let session = fixture.add_agent(1, Position::new(128.0, 128.0, 25.0));
        for seed in [10, 11] {
            let object = attachment(session.agent_id(), seed);
            fixture.scene.add_object(object.clone());
            session.add_attachment(object);
        }
        let migrator = AttachmentMigrator::new(fixture.scene.clone(), fixture.simulation.clone());

        let report = migrator.migrate(&session, &fixture.west).await;

        assert_eq!(report.migrated.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(session.attachment_count(), 0);
        assert!(fixture.scene.objects.lock().is_empty());
        assert_eq!(fixture.scene.killed_objects.lock().len(), 2);
        assert!(fixture.simulation.calls().iter().all(|call| matches!(
            call,
            SimCall::Object { request: CreateObjectRequest::FromInventory { .. }, .. }
        )));
    }

    #[tokio::test]
    async fn test_refused_attachment_stays_local_and_flagged() {
        let fixture = Fixture::new();
        let session = fixture.add_agent(1, Position::new(128.0, 128.0, 25.0));
        let object = attachment(session.agent_id(), 10);
        fixture.scene.add_object(object.clone());
        session.add_attachment(object.clone());
        fixture.simulation.reject_object.lock().insert(fixture.west.handle());
        let migrator = AttachmentMigrator::new(fixture.scene.clone(), fixture.simulation.clone());

        let report = migrator.migrate(&session, &fixture.west).await;

        assert!(report.migrated.is_empty());
        assert!(matches!(
            report.failed.as_slice(),
            [TransferError::AttachmentCrossingFailed { object: id, .. }] if *id == object.id
        ));
        assert_eq!(session.attachment_count(), 0);
        let left = fixture.scene.object(object.id).unwrap();
        assert!(left.crossing_failed);
    }
}
