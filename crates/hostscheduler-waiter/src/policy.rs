//! Polling and re-issue policy.

use std::time::Duration;

use rand::Rng;

use hostscheduler_core::WaitConfig;
use hostscheduler_core::config::parse_duration;

/// How often to poll an operation and how hard to retry a mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitPolicy {
    /// First delay between polls, and between re-issues.
    pub initial_interval: Duration,
    /// Delay cap.
    pub max_interval: Duration,
    /// Multiplier applied after every wait.
    pub multiplier: f64,
    /// Attempts per mutation, including the first. Also bounds consecutive
    /// failed status reads while polling.
    pub max_attempts: u32,
    /// Scale each delay by a random factor in 0.5..1.5.
    pub jitter: bool,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl WaitPolicy {
    /// Defaults overridden by whatever the config sets.
    pub fn from_config(config: &WaitConfig) -> Self {
        let defaults = Self::default();
        Self {
            initial_interval: config
                .initial_interval
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(defaults.initial_interval),
            max_interval: config
                .max_interval
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(defaults.max_interval),
            multiplier: config
                .multiplier
                .filter(|m| *m >= 1.0)
                .unwrap_or(defaults.multiplier),
            max_attempts: config.max_attempts.filter(|n| *n > 0).unwrap_or(defaults.max_attempts),
            jitter: defaults.jitter,
        }
    }

    /// Fixed intervals, no jitter (for tests and simulations).
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            max_attempts,
            jitter: false,
        }
    }

    /// Start a fresh backoff sequence.
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            current: self.initial_interval,
        }
    }
}

/// Exponential delay sequence, capped at `max_interval`.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a WaitPolicy,
    current: Duration,
}

impl Backoff<'_> {
    /// The next delay to sleep for.
    pub fn next_delay(&mut self) -> Duration {
        let max = self.policy.max_interval;
        let base = self.current.min(max);
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.policy.multiplier)
            .map_or(max, |next| next.min(max));
        if self.policy.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
        } else {
            base
        }
    }
}
