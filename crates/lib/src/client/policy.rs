//! Reconnect backoff: `delay = min(base * growth^attempt, cap)` with a bounded
//! attempt budget. Pure; the supervisor owns the timer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_GROWTH_FACTOR: u32 = 2;
pub const DEFAULT_CAP_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff tunables (config keys `baseDelayMs`, `growthFactor`, `capDelayMs`, `maxAttempts`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Values below 1 are treated as 1 so the delay never shrinks.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: u32,
    #[serde(default = "default_cap_delay_ms")]
    pub cap_delay_ms: u64,
    /// Automatic reconnect attempts allowed before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_growth_factor() -> u32 {
    DEFAULT_GROWTH_FACTOR
}

fn default_cap_delay_ms() -> u64 {
    DEFAULT_CAP_DELAY_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            cap_delay_ms: DEFAULT_CAP_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Backoff before the retry that follows `attempt` earlier failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let growth = u64::from(self.growth_factor.max(1));
        let ms = self
            .base_delay_ms
            .saturating_mul(growth.saturating_pow(attempt))
            .min(self.cap_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Outcome of a failed or abnormally closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Connect again after `delay`; `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Budget spent; no further automatic attempts.
    Exhausted { attempts: u32 },
}

/// Snapshot of the policy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_delay_ms: u64,
}

/// Attempt counter plus config. One per supervisor.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    last_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            last_delay: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }

    pub fn state(&self) -> ReconnectState {
        ReconnectState {
            attempt_count: self.attempts,
            max_attempts: self.config.max_attempts,
            last_delay_ms: self.last_delay.as_millis() as u64,
        }
    }

    /// Record a failure and decide what happens next.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.is_exhausted() {
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        let delay = self.config.delay_for(self.attempts);
        self.attempts += 1;
        self.last_delay = delay;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Called on every successful open and on manual reconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_delay = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_from_one_second() {
        let c = ReconnectConfig::default();
        let delays: Vec<u64> = (0..5).map(|a| c.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(c.delay_for(5), Duration::from_millis(30_000));
    }

    #[test]
    fn delay_is_monotonic_and_capped() {
        let configs = [
            ReconnectConfig::default(),
            ReconnectConfig {
                base_delay_ms: 250,
                growth_factor: 3,
                cap_delay_ms: 10_000,
                max_attempts: 40,
            },
            ReconnectConfig {
                base_delay_ms: 500,
                growth_factor: 0,
                cap_delay_ms: 400,
                max_attempts: 10,
            },
        ];
        for c in configs {
            let mut prev = Duration::ZERO;
            for attempt in 0..c.max_attempts.max(64) {
                let d = c.delay_for(attempt);
                assert!(d >= prev, "{:?} attempt {}", c, attempt);
                assert!(d <= Duration::from_millis(c.cap_delay_ms));
                prev = d;
            }
        }
    }

    #[test]
    fn large_attempts_saturate_instead_of_overflowing() {
        let c = ReconnectConfig {
            base_delay_ms: u64::MAX / 2,
            growth_factor: 10,
            cap_delay_ms: u64::MAX,
            max_attempts: 1,
        };
        assert_eq!(c.delay_for(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut p = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        });
        assert_eq!(
            p.on_failure(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            p.on_failure(),
            ReconnectDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(p.on_failure(), ReconnectDecision::Exhausted { attempts: 2 });
        assert_eq!(p.on_failure(), ReconnectDecision::Exhausted { attempts: 2 });
        assert!(p.is_exhausted());
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut p = ReconnectPolicy::new(ReconnectConfig::default());
        p.on_failure();
        p.on_failure();
        assert_eq!(p.attempts(), 2);
        assert_eq!(p.state().last_delay_ms, 2000);
        p.reset();
        assert_eq!(p.state(), ReconnectState {
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_delay_ms: 0,
        });
        assert_eq!(
            p.on_failure(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn config_reads_camel_case_with_defaults() {
        let c: ReconnectConfig =
            serde_json::from_str(r#"{ "baseDelayMs": 200, "maxAttempts": 9 }"#).unwrap();
        assert_eq!(c.base_delay_ms, 200);
        assert_eq!(c.max_attempts, 9);
        assert_eq!(c.growth_factor, DEFAULT_GROWTH_FACTOR);
        assert_eq!(c.cap_delay_ms, DEFAULT_CAP_DELAY_MS);
    }
}
