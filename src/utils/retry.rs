use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Exponential Backoff Restart Policy
// ============================================================================
//
// Decides when an entity that failed to persist may restart, and when it
// must give up. Two pieces:
// - RestartPolicy: immutable schedule (initial delay, multiplier, ceiling,
//                  jitter, maximum consecutive restarts)
// - Backoff:       per-entity state machine walking that schedule
//
// Jitter spreads restarts of many entities failing at the same moment
// (e.g. a storage blip) so that they do not hit the log together.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Delay before the first restart
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound of the delay, before jitter
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Jitter as a fraction of the delay, applied as +/- jitter_factor
    pub jitter_factor: f64,
    /// Consecutive restarts allowed before the entity is marked failed
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.2,
            max_restarts: 5,
        }
    }
}

impl RestartPolicy {
    /// More restarts with a longer ceiling, for entities that must not fail-stop easily
    pub fn aggressive() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
            max_restarts: 10,
        }
    }

    /// Few restarts, fail fast
    pub fn conservative() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.2,
            max_restarts: 2,
        }
    }

    /// Delay before restart number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before restart number `attempt`, with jitter drawn from `rng`.
    pub fn delay_for_attempt<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let range = base * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if range > 0.0 {
            rng.gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Outcome of asking a [`Backoff`] for the next restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestartDecision {
    /// Wait this long, then restart (attempt is 1-based).
    RestartAfter { attempt: u32, delay: Duration },
    /// The restart budget is spent.
    GiveUp { attempts: u32 },
}

/// Consecutive-failure counter over a [`RestartPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RestartPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: RestartPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Record a failure and decide what to do about it.
    pub fn next<R: Rng>(&mut self, rng: &mut R) -> RestartDecision {
        if self.attempts >= self.policy.max_restarts {
            return RestartDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        RestartDecision::RestartAfter {
            attempt: self.attempts,
            delay: self.policy.delay_for_attempt(self.attempts, rng),
        }
    }

    /// Forget past failures after a success.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

// Durations travel as integer milliseconds in config files.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
