//! Randomized pacing between actions.

use crate::config::{Delays, EngineConfig, Jitter};
use crate::types::ActionKind;
use crate::utils::lock_unpoisoned;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct DelayPolicy {
    delays: Delays,
    jitter: Jitter,
    floor: f64,
    rng: Mutex<StdRng>,
}

impl DelayPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self::build(config, StdRng::from_entropy())
    }

    /// Deterministic sequence for tests.
    pub fn with_seed(config: &EngineConfig, seed: u64) -> Self {
        Self::build(config, StdRng::seed_from_u64(seed))
    }

    fn build(config: &EngineConfig, rng: StdRng) -> Self {
        Self {
            delays: config.delays.clone(),
            jitter: config.jitter.clone(),
            floor: config.delay_floor.max(0.0),
            rng: Mutex::new(rng),
        }
    }

    /// `[max(floor, base - jitter), base + jitter]` in seconds.
    pub fn bounds(&self, kind: ActionKind) -> (f64, f64) {
        let base = self.delays.base(kind);
        let jitter = self.jitter.of(kind);
        let low = (base - jitter).max(self.floor);
        let high = (base + jitter).max(low);
        (low, high)
    }

    pub fn next_delay(&self, kind: ActionKind) -> Duration {
        let (low, high) = self.bounds(kind);
        let secs = if high > low {
            lock_unpoisoned(&self.rng).gen_range(low..=high)
        } else {
            low
        };
        crate::config::secs(secs)
    }
}

/// Sleep on the tokio clock. Returns `false` if `cancel` fired first.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
