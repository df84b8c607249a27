//! Core environment context trait for gridwalk region hosts.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the migration protocol can
/// run both in production (tokio) and inside the deterministic simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `OsRng`
/// - **Simulation**: `SimContext` - paused tokio clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Every source of non-determinism the protocol touches (time, task
/// scheduling, capability path generation) is owned by the implementation.
#[async_trait]
pub trait GridContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used for log correlation only.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: sleeps on the paused clock, which auto-advances
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Used for every unit of work that must not block the caller: one
    /// hand-off per migration, one task per neighbor notification.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Generates a fresh, unguessable capability object path.
    ///
    /// The returned value is the bare path segment (no slashes); callers
    /// build seed URLs around it.
    fn random_caps_path(&self) -> String;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
