use std::time::Duration;

/// Growth applied to the delay after every reconnect attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound for the reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// Exponential reconnect delay, reset by every successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    current: Duration,
}

impl Backoff {
    /// A zero `base` disables reconnection entirely. A base above
    /// [`MAX_RECONNECT_DELAY`] starts at the cap.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: base.min(MAX_RECONNECT_DELAY),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.base.is_zero()
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base.min(MAX_RECONNECT_DELAY);
    }

    /// Delay to wait before the next attempt; grows the following one,
    /// clamped to [`MAX_RECONNECT_DELAY`].
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(BACKOFF_FACTOR).min(MAX_RECONNECT_DELAY);
        delay
    }
}
