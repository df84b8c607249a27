//! Ground truth oracle for simulation.
//!
//! The Oracle looks at the whole grid at once, something no single region
//! can do, and checks the invariants the migration protocol promises:
//! - Exactly one root presence per logged-in agent
//! - No object live in two regions
//! - Attachments arrive complete and leave nothing behind
//! - No migration left pending once the world has settled
//! - Every capability seed outside the root region is backed by a presence

use crate::world::SimWorld;
use gridwalk_core::{CapabilityModule, Scene};
use gridwalk_env::{AgentId, ObjectId, RegionHandle};
use serde::Serialize;
use std::collections::HashMap;

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Short invariant name (e.g. "single_root")
    pub invariant: &'static str,

    pub detail: String,
}

impl Violation {
    fn new(invariant: &'static str, detail: String) -> Self {
        Self { invariant, detail }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.detail)
    }
}

/// The Oracle - checks grid-wide invariants against scenario expectations.
#[derive(Debug, Default)]
pub struct Oracle {
    /// Attachments each agent must be wearing at its root
    expected_attachments: HashMap<AgentId, usize>,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records how many attachments an agent should end up wearing.
    pub fn expect_attachments(&mut self, agent: AgentId, count: usize) {
        self.expected_attachments.insert(agent, count);
    }

    /// Checks every invariant; an empty result means the world is consistent.
    pub fn check(&self, world: &SimWorld) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_single_root(world, &mut violations);
        self.check_unique_objects(world, &mut violations);
        self.check_attachments(world, &mut violations);
        self.check_nothing_pending(world, &mut violations);
        self.check_child_seeds(world, &mut violations);
        violations
    }

    fn check_single_root(&self, world: &SimWorld, violations: &mut Vec<Violation>) {
        for viewer in world.network.viewers() {
            let agent = viewer.agent();
            let roots: Vec<String> = world
                .network
                .hosts()
                .iter()
                .filter(|h| h.region.presences().iter().any(|p| p.agent_id() == agent && !p.is_child()))
                .map(|h| h.region.info().name.clone())
                .collect();
            if roots.len() != 1 {
                violations.push(Violation::new(
                    "single_root",
                    format!("agent {} is root in {:?}", agent, roots),
                ));
            }
        }
    }

    fn check_unique_objects(&self, world: &SimWorld, violations: &mut Vec<Violation>) {
        let mut seen: HashMap<ObjectId, String> = HashMap::new();
        for host in world.network.hosts() {
            let name = &host.region.info().name;
            for object in host.region.objects() {
                if let Some(first) = seen.insert(object.id, name.clone()) {
                    violations.push(Violation::new(
                        "unique_objects",
                        format!("object {} is live in {} and {}", object.id, first, name),
                    ));
                }
            }
        }
    }

    fn check_attachments(&self, world: &SimWorld, violations: &mut Vec<Violation>) {
        for (agent, expected) in &self.expected_attachments {
            let Ok(host) = world.root_host(*agent) else {
                // Reported by single_root
                continue;
            };
            let Some(session) = host.region.presence(*agent) else {
                continue;
            };

            let worn = session.attachments();
            if worn.len() != *expected {
                violations.push(Violation::new(
                    "attachments",
                    format!("agent {} wears {} attachments, expected {}", agent, worn.len(), expected),
                ));
            }
            for object in worn {
                if host.region.objects().iter().all(|o| o.id != object.id) {
                    violations.push(Violation::new(
                        "attachments",
                        format!("attachment {} of {} is missing from the scene", object.id, agent),
                    ));
                }
            }

            for other in world.network.hosts() {
                if other.region.info().id == host.region.info().id {
                    continue;
                }
                let left = other
                    .region
                    .objects()
                    .iter()
                    .filter(|o| o.is_attachment && o.owner_id == *agent)
                    .count();
                if left > 0 {
                    violations.push(Violation::new(
                        "attachments",
                        format!("{} attachments of {} left in {}", left, agent, other.region.info().name),
                    ));
                }
            }
        }
    }

    fn check_nothing_pending(&self, world: &SimWorld, violations: &mut Vec<Violation>) {
        for host in world.network.hosts() {
            let pending = host.coordinator.tracker().pending_count();
            if pending > 0 {
                violations.push(Violation::new(
                    "nothing_pending",
                    format!("{} migrations still pending in {}", pending, host.region.info().name),
                ));
            }
        }
    }

    fn check_child_seeds(&self, world: &SimWorld, violations: &mut Vec<Violation>) {
        for viewer in world.network.viewers() {
            let agent = viewer.agent();
            let Ok(root) = world.root_host(agent) else {
                continue;
            };
            let root_handle = root.region.info().handle();
            let seeds = world.capabilities.children_seeds(agent);

            if !seeds.is_empty() && !seeds.contains_key(&root_handle) {
                violations.push(Violation::new(
                    "child_seeds",
                    format!("agent {} holds no seed for its root region {}", agent, root_handle),
                ));
            }
            for handle in seeds.keys().filter(|h| **h != root_handle) {
                if !Self::backed(world, agent, *handle) {
                    violations.push(Violation::new(
                        "child_seeds",
                        format!("agent {} has a seed for {} but no child agent there", agent, handle),
                    ));
                }
            }
        }
    }

    /// True when the region holds a child for the agent, or cannot be asked.
    fn backed(world: &SimWorld, agent: AgentId, region: RegionHandle) -> bool {
        if !world.network.controller().is_reachable(region) {
            return true;
        }
        world
            .network
            .host(region)
            .map_or(true, |host| host.region.presence(agent).map_or(false, |p| p.is_child()))
    }
}
