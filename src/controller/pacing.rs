use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a cancellable wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full pause elapsed
    Completed,
    /// The stop signal was raised first
    Interrupted,
}

/// Wait for `duration` unless `cancel` fires first.
pub async fn wait_for(duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("stop signal detected while waiting");
            WaitOutcome::Interrupted
        }
        _ = tokio::time::sleep(duration) => WaitOutcome::Completed,
    }
}

/// Randomised pause between two control cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacer {
    min_secs: u64,
    max_secs: u64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(300, 600)
    }
}

impl Pacer {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs: min_secs.min(max_secs),
            max_secs: min_secs.max(max_secs),
        }
    }

    /// Pause range `[refresh / 2, refresh]`
    pub fn from_refresh_interval(refresh_secs: u64) -> Self {
        Self::new(refresh_secs / 2, refresh_secs)
    }

    pub fn min_secs(&self) -> u64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Uniformly drawn pause length
    pub fn draw(&self) -> Duration {
        Duration::from_secs(rand::thread_rng().gen_range(self.min_secs..=self.max_secs))
    }

    pub async fn wait(&self, cancel: &CancellationToken) -> WaitOutcome {
        wait_for(self.draw(), cancel).await
    }
}

/// Fixed-backoff retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Always at least one attempt
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}
