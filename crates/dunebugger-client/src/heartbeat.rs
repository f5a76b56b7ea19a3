//! Heartbeat countdown.
//!
//! The countdown is a plain counter decremented once per tick. The session
//! actor owns the timer that produces ticks; this type only decides when
//! the liveness window has lapsed.

use std::time::Duration;

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Window still open; `remaining` ticks are left.
    Running { remaining: u64 },
    /// The window lapsed on this tick.
    Expired,
}

/// Counts down the ticks left before the device is considered offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatCountdown {
    window: u64,
    remaining: u64,
}

impl HeartbeatCountdown {
    /// Creates a countdown that expires after `window` ticks.
    pub fn new(window: u64) -> Self {
        Self {
            window,
            remaining: window,
        }
    }

    /// Creates a countdown covering `timeout` with one tick per `tick`.
    ///
    /// A timeout shorter than one tick still needs one tick to expire.
    pub fn from_timeout(timeout: Duration, tick: Duration) -> Self {
        let tick_ms = tick.as_millis().max(1);
        let window = (timeout.as_millis() / tick_ms).max(1);
        Self::new(u64::try_from(window).unwrap_or(u64::MAX))
    }

    /// Restarts the window from the full count.
    pub fn reset(&mut self) {
        self.remaining = self.window;
    }

    /// Advances the countdown by one tick.
    pub fn tick(&mut self) -> CountdownTick {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            CountdownTick::Expired
        } else {
            CountdownTick::Running {
                remaining: self.remaining,
            }
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn window(&self) -> u64 {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_on_last_tick() {
        let mut countdown = HeartbeatCountdown::new(3);
        assert_eq!(countdown.tick(), CountdownTick::Running { remaining: 2 });
        assert_eq!(countdown.tick(), CountdownTick::Running { remaining: 1 });
        assert_eq!(countdown.tick(), CountdownTick::Expired);
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn test_reset_restores_full_window() {
        let mut countdown = HeartbeatCountdown::new(3);
        countdown.tick();
        countdown.tick();
        countdown.reset();
        assert_eq!(countdown.remaining(), 3);
        assert_eq!(countdown.tick(), CountdownTick::Running { remaining: 2 });
    }

    #[test]
    fn test_from_timeout_uses_whole_ticks() {
        let countdown =
            HeartbeatCountdown::from_timeout(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(countdown.window(), 10);

        let countdown =
            HeartbeatCountdown::from_timeout(Duration::from_millis(2500), Duration::from_secs(1));
        assert_eq!(countdown.window(), 2);
    }

    #[test]
    fn test_sub_tick_timeout_expires_on_first_tick() {
        let mut countdown =
            HeartbeatCountdown::from_timeout(Duration::from_millis(300), Duration::from_secs(1));
        assert_eq!(countdown.tick(), CountdownTick::Expired);

        let mut countdown = HeartbeatCountdown::new(0);
        assert_eq!(countdown.tick(), CountdownTick::Expired);
    }

    #[test]
    fn test_ticks_after_expiry_stay_expired() {
        let mut countdown = HeartbeatCountdown::new(1);
        assert_eq!(countdown.tick(), CountdownTick::Expired);
        assert_eq!(countdown.tick(), CountdownTick::Expired);
    }
}
