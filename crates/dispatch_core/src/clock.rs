//! Wall-clock seam.
//!
//! Timestamps written to the shared ride store are compared by whichever
//! node handles the next request, so they must be unix milliseconds, never
//! process-local uptime. [`TokioClock`] pins the advancing part to the
//! tokio timer, which lets paused-clock tests drive it with
//! `tokio::time::advance`.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

pub trait Clock: Send + Sync {
    /// Current time in unix milliseconds.
    fn now_ms(&self) -> u64;
}

/// Straight system wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Unix base captured at construction plus tokio-timer elapsed. Under a
/// normal runtime this tracks the system clock; under a paused runtime it
/// follows the virtual timer instead.
pub struct TokioClock {
    base_unix_ms: u64,
    epoch: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base_unix_ms: SystemClock.now_ms(),
            epoch: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.base_unix_ms + self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_the_virtual_timer() {
        let clock = TokioClock::new();
        let start = clock.now_ms();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.now_ms(), start + 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_clock_reads_the_same_from_every_holder() {
        let clock = std::sync::Arc::new(TokioClock::new());
        let other = std::sync::Arc::clone(&clock);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(clock.now_ms(), other.now_ms());
    }
}
