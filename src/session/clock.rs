//! Monotonic session clock
//!
//! All internal timestamps are in session ticks: 10 000 per second, one
//! tick per 100 µs. RTP timestamps are the low 32 bits; the clock-sync
//! exchange uses the full 64-bit value.

use std::time::SystemTime;

use tokio::time::Instant;

use crate::protocol::constants::SESSION_RATE;

/// Monotonic tick source for one session
#[derive(Debug, Clone)]
pub struct SessionClock {
    start: Instant,
    wall_origin: SystemTime,
}

impl SessionClock {
    /// Capture the clock origin
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            wall_origin: SystemTime::now(),
        }
    }

    /// Current tick, full width
    #[must_use]
    pub fn now64(&self) -> u64 {
        self.ticks_at(Instant::now())
    }

    /// Current tick truncated to the 32-bit RTP timestamp space
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now(&self) -> u32 {
        self.now64() as u32
    }

    /// Tick value for an arbitrary instant (rounded to the nearest tick)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ticks_at(&self, instant: Instant) -> u64 {
        let micros = instant.saturating_duration_since(self.start).as_micros();
        ((micros + 50) / 100) as u64
    }

    /// Translate an externally supplied wall-clock timestamp into ticks
    ///
    /// Times before the clock origin map to tick 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn wall_to_ticks(&self, time: SystemTime) -> u64 {
        match time.duration_since(self.wall_origin) {
            Ok(elapsed) => ((elapsed.as_micros() + 50) / 100) as u64,
            Err(_) => 0,
        }
    }

    /// Convert a tick delta to seconds
    #[must_use]
    pub fn ticks_to_seconds(ticks: u64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let ticks = ticks as f64;
        ticks / f64::from(SESSION_RATE)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
