//! Simulation context implementing GridContext for deterministic testing.

use async_trait::async_trait;
use gridwalk_env::GridContext;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use uuid::Builder;

/// Simulation context backed by the paused Tokio clock and a seeded RNG.
///
/// This implements `GridContext` using:
/// - Tokio's clock, which the harness runs paused so that time only moves
///   when every task is blocked on a timer
/// - A seeded ChaCha8 RNG for capability paths
///
/// Must be created inside the simulation runtime so `now()` is measured
/// against the paused clock.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time zero
    start: Instant,

    /// Deterministic RNG for capability paths
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Number of tasks spawned through this context
    spawned: Arc<AtomicU64>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            spawned: Arc::new(AtomicU64::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Total tasks spawned so far.
    pub fn spawned_tasks(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            start: self.start,
            rng: Arc::clone(&self.rng),
            spawned: Arc::clone(&self.spawned),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl GridContext for SimContext {
    fn now(&self) -> Duration {
        Instant::now().duration_since(self.start)
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // The paused clock jumps straight to the next timer
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(task = name, "Spawning simulated task");
        tokio::spawn(future);
    }

    fn random_caps_path(&self) -> String {
        let bytes: [u8; 16] = self.rng.lock().gen();
        Builder::from_random_bytes(bytes).into_uuid().to_string()
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.sleep(Duration::from_millis(500)).await;
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(
            ctx.system_time(),
            UNIX_EPOCH + Duration::from_secs(1704067200) + Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_sim_context_deterministic_caps_paths() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a = ctx1.random_caps_path();
        let b = ctx2.random_caps_path();

        // Same seed = same sequence
        assert_eq!(a, b);

        // Next draw differs
        assert_ne!(a, ctx1.random_caps_path());

        // Different seed = different path
        assert_ne!(a, SimContext::new(43).random_caps_path());
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }

    #[test]
    fn test_sim_context_clone_shares_rng() {
        let ctx1 = SimContext::new(7);
        let ctx2 = ctx1.clone();
        let reference = SimContext::new(7);

        let first = ctx1.random_caps_path();
        let second = ctx2.random_caps_path();

        assert_eq!(first, reference.random_caps_path());
        assert_eq!(second, reference.random_caps_path());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_counts_tasks() {
        let ctx = SimContext::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel();

        ctx.spawn("ticker", async move {
            let _ = tx.send(5);
        });

        assert_eq!(rx.await.unwrap(), 5);
        assert_eq!(ctx.spawned_tasks(), 1);
    }
}
