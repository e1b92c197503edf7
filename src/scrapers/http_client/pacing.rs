//! Randomized request pacing with adaptive backoff.
//!
//! Every fetch waits a random delay drawn from `[min_delay, max_delay]` so
//! requests don't arrive on a fixed beat. On top of that, 429/503 responses
//! add a backoff that grows exponentially and decays after a run of
//! successes.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for pacing behavior.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Lower bound of the per-request jitter.
    pub min_delay: Duration,
    /// Upper bound of the per-request jitter.
    pub max_delay: Duration,
    /// First backoff step after a rate limit.
    pub initial_backoff: Duration,
    /// Ceiling for backoff.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff on rate limit.
    pub backoff_multiplier: f64,
    /// Multiplier for recovery on success (< 1.0 to decrease backoff).
    pub recovery_multiplier: f64,
    /// Number of consecutive successes before reducing backoff.
    pub recovery_threshold: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(700),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.5,
            recovery_threshold: 3,
        }
    }
}

impl PacingConfig {
    /// Jitter only; backoff settings keep their defaults.
    pub fn with_range(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay: min_delay.min(max_delay),
            max_delay: max_delay.max(min_delay),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct PacingState {
    backoff: Duration,
    consecutive_successes: u32,
    total_requests: u64,
    rate_limit_hits: u64,
}

/// Snapshot of pacing counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingStats {
    pub backoff: Duration,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

/// Shared pacing gate; clones share state.
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
    state: Arc<RwLock<PacingState>>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(PacingState::default())),
        }
    }

    /// No delay at all; for tests and local fixtures.
    pub fn disabled() -> Self {
        Self::new(PacingConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        })
    }

    /// Draw a delay from the configured jitter range.
    pub fn jitter(&self) -> Duration {
        let lo = self.config.min_delay.as_millis() as u64;
        let hi = self.config.max_delay.as_millis() as u64;
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Sleep before a fetch. Returns the time waited.
    pub async fn wait(&self) -> Duration {
        let backoff = {
            let mut state = self.state.write().await;
            state.total_requests += 1;
            state.backoff
        };
        let delay = self.jitter() + backoff;

        if delay > Duration::ZERO {
            if backoff > Duration::ZERO {
                debug!("Pacing: waiting {:?} (backoff {:?})", delay, backoff);
            }
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// Report a rate-limit response (429 or 503) - increases backoff.
    pub async fn report_rate_limit(&self, status_code: u16) {
        let mut state = self.state.write().await;
        state.rate_limit_hits += 1;
        state.consecutive_successes = 0;

        let next = if state.backoff.is_zero() {
            self.config.initial_backoff
        } else {
            Duration::from_secs_f64(state.backoff.as_secs_f64() * self.config.backoff_multiplier)
        };
        state.backoff = next.min(self.config.max_backoff);

        warn!(
            "Rate limited (HTTP {}), backing off to {:?}",
            status_code, state.backoff
        );
    }

    /// Report a successful response - may decrease backoff.
    pub async fn report_success(&self) {
        let mut state = self.state.write().await;
        if state.backoff.is_zero() {
            return;
        }

        state.consecutive_successes += 1;
        if state.consecutive_successes < self.config.recovery_threshold {
            return;
        }
        state.consecutive_successes = 0;

        let reduced =
            Duration::from_secs_f64(state.backoff.as_secs_f64() * self.config.recovery_multiplier);
        if reduced < self.config.min_delay.max(Duration::from_millis(100)) {
            state.backoff = Duration::ZERO;
            info!("Recovered from rate limit backoff");
        } else {
            state.backoff = reduced;
            debug!("Backoff reduced to {:?}", state.backoff);
        }
    }

    pub async fn stats(&self) -> PacingStats {
        let state = self.state.read().await;
        PacingStats {
            backoff: state.backoff,
            total_requests: state.total_requests,
            rate_limit_hits: state.rate_limit_hits,
        }
    }
}
