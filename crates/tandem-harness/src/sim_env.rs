//! Simulation environment.
//!
//! Time comes from tokio's clock. Under a paused runtime
//! (`#[tokio::test(start_paused = true)]`) it is virtual: it only moves when
//! every task is idle, jumping straight to the next timer, so ring timeouts
//! and reconnect backoff elapse instantly and in a reproducible order.
//! Randomness comes from a seeded ChaCha stream shared by every clone.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::Environment;
use tokio::time::Instant;

/// Wall-clock origin of every simulation: 2024-01-01T00:00:00Z.
pub const SIM_EPOCH_SECS: i64 = 1_704_067_200;

/// Deterministic environment for simulations.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    origin: Instant,
    epoch: DateTime<Utc>,
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose random stream is fixed by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            origin: Instant::now(),
            epoch: DateTime::from_timestamp(SIM_EPOCH_SECS, 0).unwrap_or_default(),
        }
    }

    /// Virtual time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        Instant::now() - self.origin
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        self.epoch + TimeDelta::from_std(self.elapsed()).unwrap_or_else(|_| TimeDelta::zero())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        assert_eq!(a.random_u128(), b.random_u128());
        assert_ne!(a.random_u128(), SimEnv::with_seed(8).random_u128());
    }

    #[test]
    fn clones_share_the_stream() {
        let a = SimEnv::with_seed(1);
        let b = a.clone();
        assert_ne!(a.random_u64(), b.random_u64());
    }

    #[tokio::test(start_paused = true)]
    async fn virtual_time_drives_both_clocks() {
        let env = SimEnv::new();
        let start = env.now();

        env.sleep(Duration::from_secs(45)).await;

        assert_eq!(env.now() - start, Duration::from_secs(45));
        assert_eq!(env.wall_clock().timestamp(), SIM_EPOCH_SECS + 45);
    }
}
