//! TransitTracker - registry of agents currently mid-migration.
//!
//! Shared by every concurrently running hand-off and by the arrival and
//! cancel entry points. All access goes through one lock; the backing
//! containers are never handed out.

use gridwalk_env::{AgentId, GridContext, RegionHandle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Bookkeeping for one running migration.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransfer {
    pub agent: AgentId,

    /// Target region, once resolved
    pub destination: Option<RegionHandle>,

    /// Context time at which the migration started
    pub started_at: Duration,

    /// Context time after which confirmation is considered lost
    pub deadline: Option<Duration>,
}

impl PendingTransfer {
    pub fn new(agent: AgentId, started_at: Duration) -> Self {
        Self {
            agent,
            destination: None,
            started_at,
            deadline: None,
        }
    }
}

/// How a wait for arrival ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// The destination confirmed the viewer arrived
    Arrived,
    /// The user canceled before confirmation
    Canceled,
    /// No confirmation within the deadline
    TimedOut,
}

#[derive(Debug, Default)]
struct TransitState {
    pending: HashMap<AgentId, PendingTransfer>,
    in_transit: HashSet<AgentId>,
    canceling: HashSet<AgentId>,
    signals: HashMap<AgentId, Arc<Notify>>,
}

/// Concurrency-safe set of in-flight migrations and cancel requests.
#[derive(Debug, Clone, Default)]
pub struct TransitTracker {
    state: Arc<Mutex<TransitState>>,
}

impl TransitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration, rejecting a second one for the same agent.
    ///
    /// The returned guard removes every marker for the agent when dropped.
    pub fn begin(&self, transfer: PendingTransfer) -> Result<TransitGuard, AgentId> {
        let agent = transfer.agent;
        let mut state = self.state.lock();
        if state.pending.contains_key(&agent) {
            return Err(agent);
        }
        state.pending.insert(agent, transfer);
        state.signals.insert(agent, Arc::new(Notify::new()));
        state.canceling.remove(&agent);

        Ok(TransitGuard {
            tracker: self.clone(),
            agent,
        })
    }

    pub fn is_pending(&self, agent: AgentId) -> bool {
        self.state.lock().pending.contains_key(&agent)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn set_destination(&self, agent: AgentId, destination: RegionHandle) {
        if let Some(transfer) = self.state.lock().pending.get_mut(&agent) {
            transfer.destination = Some(destination);
        }
    }

    /// Marks the agent as handed to the viewer and awaiting arrival.
    pub fn set_in_transit(&self, agent: AgentId, deadline: Duration) {
        let mut state = self.state.lock();
        if let Some(transfer) = state.pending.get_mut(&agent) {
            transfer.deadline = Some(deadline);
        }
        state.in_transit.insert(agent);
    }

    pub fn is_in_transit(&self, agent: AgentId) -> bool {
        self.state.lock().in_transit.contains(&agent)
    }

    /// Clears the in-transit marker. Returns false if the agent was not in transit.
    pub fn reset_from_transit(&self, agent: AgentId) -> bool {
        let mut state = self.state.lock();
        let was_in_transit = state.in_transit.remove(&agent);
        if was_in_transit {
            if let Some(signal) = state.signals.get(&agent) {
                signal.notify_one();
            }
        }
        was_in_transit
    }

    /// Flags a running migration for cancellation.
    ///
    /// Returns false if no migration is running for the agent.
    pub fn request_cancel(&self, agent: AgentId) -> bool {
        let mut state = self.state.lock();
        if !state.pending.contains_key(&agent) {
            return false;
        }
        state.canceling.insert(agent);
        if let Some(signal) = state.signals.get(&agent) {
            signal.notify_one();
        }
        true
    }

    pub fn is_cancel_requested(&self, agent: AgentId) -> bool {
        self.state.lock().canceling.contains(&agent)
    }

    pub fn clear_cancel(&self, agent: AgentId) {
        self.state.lock().canceling.remove(&agent);
    }

    /// Waits until the agent arrives, the user cancels, or `timeout` elapses.
    ///
    /// Arrival wins over a cancel request that lands at the same time: once
    /// the destination holds the viewer there is nothing left to cancel.
    pub async fn wait_for_arrival<C: GridContext>(
        &self,
        ctx: &C,
        agent: AgentId,
        timeout: Duration,
    ) -> ArrivalOutcome {
        let deadline = ctx.now() + timeout;
        let signal = match self.state.lock().signals.get(&agent) {
            Some(signal) => signal.clone(),
            None => return ArrivalOutcome::TimedOut,
        };

        loop {
            {
                let state = self.state.lock();
                if !state.in_transit.contains(&agent) {
                    return ArrivalOutcome::Arrived;
                }
                if state.canceling.contains(&agent) {
                    return ArrivalOutcome::Canceled;
                }
            }

            let now = ctx.now();
            if now >= deadline {
                return ArrivalOutcome::TimedOut;
            }

            tokio::select! {
                _ = signal.notified() => {}
                _ = ctx.sleep(deadline - now) => {}
            }
        }
    }

    fn finish(&self, agent: AgentId) {
        let mut state = self.state.lock();
        state.pending.remove(&agent);
        state.in_transit.remove(&agent);
        state.canceling.remove(&agent);
        state.signals.remove(&agent);
    }
}

/// Holds an agent's migration slot for the lifetime of one hand-off.
#[derive(Debug)]
pub struct TransitGuard {
    tracker: TransitTracker,
    agent: AgentId,
}

impl TransitGuard {
    pub fn agent(&self) -> AgentId {
        self.agent
    }
}

impl Drop for TransitGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.agent);
    }
}
