//! Exponential reconnect backoff with a ceiling.

use std::time::Duration;

use parley_types::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(base);
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    /// Delay before the next attempt. Each call doubles the following delay,
    /// capped at the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.ceiling, |next| next.min(self.ceiling));
        delay
    }

    /// Back to the base delay, after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
