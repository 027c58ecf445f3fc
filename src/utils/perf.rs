//! Performance monitoring utilities
//!
//! Frame-rate counting for the vision loop and latency tracking for the
//! dialogue round trip.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts completed loop iterations per wall-clock second
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
    fps: f32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            fps: 0.0,
        }
    }

    /// Record one completed iteration. Returns the new rate whenever a full
    /// second has elapsed since the window opened.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        self.fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    /// Rate measured over the last completed window
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}

/// Tracks timing metrics over a sliding window
#[derive(Debug)]
pub struct TimingTracker {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl TimingTracker {
    /// Create a new timing tracker with the given window size
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a new timing sample
    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// Get the average duration
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    /// Get the maximum duration
    pub fn max(&self) -> Duration {
        self.samples.iter().max().copied().unwrap_or(Duration::ZERO)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// A simple stopwatch for measuring elapsed time
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_counter_reports_after_one_second() {
        let t0 = Instant::now();
        let mut counter = FpsCounter::new(t0);
        for i in 1..30 {
            assert!(counter.tick(t0 + Duration::from_millis(i * 33)).is_none());
        }
        let fps = counter.tick(t0 + Duration::from_millis(1000)).unwrap();
        assert!((fps - 30.0).abs() < 0.01);
        assert_eq!(counter.fps(), fps);
    }

    #[test]
    fn test_fps_counter_reset() {
        let t0 = Instant::now();
        let mut counter = FpsCounter::new(t0);
        counter.tick(t0 + Duration::from_secs(2));
        assert!(counter.fps() > 0.0);
        counter.reset(t0);
        assert_eq!(counter.fps(), 0.0);
    }

    #[test]
    fn test_timing_tracker() {
        let mut tracker = TimingTracker::new(10);

        for i in 1..=5 {
            tracker.record(Duration::from_millis(i * 10));
        }

        assert_eq!(tracker.max(), Duration::from_millis(50));
        assert_eq!(tracker.average(), Duration::from_millis(30));
    }

    #[test]
    fn test_timing_tracker_window() {
        let mut tracker = TimingTracker::new(3);

        for i in 1..=5 {
            tracker.record(Duration::from_millis(i * 10));
        }

        // Should only have last 3 samples
        assert_eq!(tracker.average(), Duration::from_millis(40));
        assert_eq!(tracker.max(), Duration::from_millis(50));
    }

    #[test]
    fn test_stopwatch() {
        let sw = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(sw.elapsed_ms() >= 10);
    }
}
