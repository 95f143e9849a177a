// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Wall clock for the frame loop.
///
/// A stopped clock keeps its last elapsed value and ignores `update`.
#[derive(Debug, Default)]
pub struct FrameClock {
    start: Option<Instant>,
    elapsed: Duration,
    last_update: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) the clock and zeroes the elapsed time.
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        self.elapsed = Duration::ZERO;
        self.last_update = Duration::ZERO;
    }

    pub fn stop(&mut self) {
        self.start = None;
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    /// Refreshes the elapsed time and returns the delta since the previous
    /// update, in seconds. Returns 0 for a stopped clock.
    pub fn update(&mut self) -> f32 {
        let Some(start) = self.start else {
            return 0.0;
        };
        self.elapsed = start.elapsed();
        let delta = self.elapsed.saturating_sub(self.last_update);
        self.last_update = self.elapsed;
        delta.as_secs_f32()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_clock_ignores_update() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.update(), 0.0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert!(!clock.is_running());
    }

    #[test]
    fn stop_keeps_elapsed() {
        let mut clock = FrameClock::new();
        clock.start();
        std::thread::sleep(Duration::from_millis(2));
        clock.update();
        let before = clock.elapsed();
        assert!(before > Duration::ZERO);

        clock.stop();
        std::thread::sleep(Duration::from_millis(2));
        clock.update();
        assert_eq!(clock.elapsed(), before);
    }

    #[test]
    fn deltas_sum_to_elapsed() {
        let mut clock = FrameClock::new();
        clock.start();
        let mut total = 0.0f64;
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(1));
            total += clock.update() as f64;
        }
        assert!((total - clock.elapsed_secs()).abs() < 1e-3);
    }
}
