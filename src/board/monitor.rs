// src/board/monitor.rs
//
// Tracks when one watched input bit last changed state.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct InputMonitor {
    /// Bit within input bank 0
    bit: u8,
    interval: Duration,
    last_level: Option<bool>,
    last_change: Instant,
    last_poll: Option<Instant>,
}

impl InputMonitor {
    pub fn new(bit: u8, interval: Duration) -> Self {
        Self::starting_at(bit, interval, Instant::now())
    }

    pub fn starting_at(bit: u8, interval: Duration, now: Instant) -> Self {
        Self {
            bit: bit.min(7),
            interval,
            last_level: None,
            last_change: now,
            last_poll: None,
        }
    }

    /// Whether a sample is due at `now`
    pub fn due(&self, now: Instant) -> bool {
        match self.last_poll {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Record a bank 0 sample taken at `now`. Returns `true` if the watched bit changed.
    pub fn sample(&mut self, bank0: u8, now: Instant) -> bool {
        self.last_poll = Some(now);
        let level = bank0 & (1 << self.bit) != 0;
        let changed = self.last_level.is_some_and(|prev| prev != level);
        if changed {
            self.last_change = now;
        }
        self.last_level = Some(level);
        changed
    }

    /// Milliseconds since the watched bit last changed (or since start)
    pub fn elapsed_ms(&self, now: Instant) -> i32 {
        let ms = now.saturating_duration_since(self.last_change).as_millis();
        i32::try_from(ms).unwrap_or(i32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_resets_elapsed() {
        let t0 = Instant::now();
        let mut mon = InputMonitor::starting_at(5, Duration::from_millis(10), t0);

        assert!(!mon.sample(0x00, t0));
        assert_eq!(mon.elapsed_ms(t0 + Duration::from_millis(250)), 250);

        let t1 = t0 + Duration::from_millis(300);
        assert!(mon.sample(0x20, t1));
        assert_eq!(mon.elapsed_ms(t1 + Duration::from_millis(40)), 40);
    }

    #[test]
    fn test_other_bits_ignored() {
        let t0 = Instant::now();
        let mut mon = InputMonitor::starting_at(5, Duration::from_millis(10), t0);
        mon.sample(0x00, t0);
        assert!(!mon.sample(0xDF, t0 + Duration::from_millis(20)));
        assert_eq!(mon.elapsed_ms(t0 + Duration::from_millis(20)), 20);
    }

    #[test]
    fn test_due_interval() {
        let t0 = Instant::now();
        let mut mon = InputMonitor::starting_at(5, Duration::from_millis(10), t0);
        assert!(mon.due(t0));
        mon.sample(0, t0);
        assert!(!mon.due(t0 + Duration::from_millis(5)));
        assert!(mon.due(t0 + Duration::from_millis(10)));
    }
}
