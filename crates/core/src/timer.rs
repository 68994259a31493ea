//! Frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for frame deltas and periodic frame statistics.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    /// Frames counted since the last report.
    frames: u32,
    /// Start of the current reporting window.
    window_start: Instant,
}

/// Frame statistics over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Frames completed in the window.
    pub frames: u32,
    /// Average frames per second.
    pub fps: f32,
    /// Average frame time in milliseconds.
    pub frame_ms: f32,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            window_start: now,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Time elapsed since the last call to `tick()`.
    ///
    /// Each tick also counts one frame towards [`Timer::report`].
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        delta
    }

    /// Returns frame statistics once `interval` has passed since the last
    /// report, then starts a new window.
    pub fn report(&mut self, interval: Duration) -> Option<FrameStats> {
        let window = self.window_start.elapsed();
        if window < interval || self.frames == 0 {
            return None;
        }

        let stats = Self::stats_for(self.frames, window);
        self.frames = 0;
        self.window_start = Instant::now();
        Some(stats)
    }

    fn stats_for(frames: u32, window: Duration) -> FrameStats {
        let secs = window.as_secs_f32().max(f32::EPSILON);
        FrameStats {
            frames,
            fps: frames as f32 / secs,
            frame_ms: secs * 1000.0 / frames as f32,
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_for_one_second_window() {
        let stats = Timer::stats_for(60, Duration::from_secs(1));
        assert_eq!(stats.frames, 60);
        assert!((stats.fps - 60.0).abs() < 1e-3);
        assert!((stats.frame_ms - 16.666).abs() < 1e-2);
    }

    #[test]
    fn test_report_waits_for_interval() {
        let mut timer = Timer::new();
        timer.tick();
        assert!(timer.report(Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn test_report_resets_window() {
        let mut timer = Timer::new();
        timer.tick();
        timer.tick();
        let stats = timer.report(Duration::ZERO).expect("window elapsed");
        assert_eq!(stats.frames, 2);
        assert!(timer.report(Duration::ZERO).is_none());
    }
}
