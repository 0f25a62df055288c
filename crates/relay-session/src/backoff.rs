use std::time::Duration;

use rand::Rng;
use relay_settings::ReconnectSettings;

/// Exponential backoff with randomized jitter.
///
/// There is no attempt limit; delays grow by `factor` until they reach `max`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            factor: factor.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            current: initial,
            attempts: 0,
        }
    }

    /// Compute the next delay (with jitter) and advance the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let current_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;

        let delay_ms = if self.jitter > 0.0 {
            let scale = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            (current_ms as f64 * scale) as u64
        } else {
            current_ms
        };

        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let next_ms = ((current_ms as f64) * self.factor).min(max_ms as f64) as u64;
        self.current = Duration::from_millis(next_ms);
        self.attempts = self.attempts.saturating_add(1);

        Duration::from_millis(delay_ms)
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to its initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

impl From<&ReconnectSettings> for ExponentialBackoff {
    fn from(settings: &ReconnectSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.backoff_factor,
            settings.jitter_factor,
        )
    }
}
