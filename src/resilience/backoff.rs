//! Exponential backoff between reconnect attempts.

use std::time::Duration;

/// Backoff state for one retry sequence.
///
/// The first delay is `min`; with `increment` each further failure doubles it
/// up to `max`. [`Backoff::reset`] returns to `min`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    increment: bool,
    failures: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, increment: bool) -> Self {
        Self {
            min,
            max: max.max(min),
            increment,
            failures: 0,
        }
    }

    /// Delay to wait after the failure just observed.
    pub fn next_delay(&mut self) -> Duration {
        let delay = calculate_backoff(self.failures, self.min, self.max, self.increment);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn calculate_backoff(failures: u32, min: Duration, max: Duration, increment: bool) -> Duration {
    if !increment {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let exponential_base = 2u64.saturating_pow(failures);
    let delay_ms = min_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms).min(max)
}
