use std::time::{Duration, Instant};

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,
    pub now: Instant,
    pub frame_index: u64,
}

/// Produces [`FrameTime`] snapshots for one window.
///
/// Delta time is clamped so a stalled or minimised window does not make
/// animated scenes jump.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self { last: Instant::now(), frame_index: 0, dt_min, dt_max }
    }

    /// Restarts delta measurement from now.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> FrameTime {
        let dt = now.saturating_duration_since(self.last).clamp(self.dt_min, self.dt_max);
        self.last = now;
        let ft = FrameTime { dt: dt.as_secs_f32(), now, frame_index: self.frame_index };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires once every `period` seconds of accumulated frame time.
#[derive(Debug, Clone)]
pub struct Interval {
    period: f32,
    acc: f32,
    frames: u32,
}

impl Interval {
    pub fn new(period: f32) -> Self {
        Self { period: period.max(f32::EPSILON), acc: 0.0, frames: 0 }
    }

    /// Adds `dt`; returns the number of frames in the period when it elapses.
    pub fn step(&mut self, dt: f32) -> Option<u32> {
        self.acc += dt;
        self.frames += 1;
        if self.acc < self.period {
            return None;
        }
        self.acc %= self.period;
        Some(std::mem::take(&mut self.frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_is_clamped() {
        let mut clock = FrameClock::with_clamps(Duration::from_millis(1), Duration::from_millis(50));
        let start = clock.last;
        let ft = clock.tick_at(start + Duration::from_secs(3));
        assert!((ft.dt - 0.05).abs() < 1e-6);
        assert_eq!(ft.frame_index, 0);
        let ft = clock.tick_at(start + Duration::from_secs(3));
        assert!((ft.dt - 0.001).abs() < 1e-6);
        assert_eq!(ft.frame_index, 1);
    }

    #[test]
    fn interval_reports_frames_per_period() {
        let mut every = Interval::new(1.0);
        for _ in 0..3 {
            assert_eq!(every.step(0.3), None);
        }
        assert_eq!(every.step(0.3), Some(4));
        assert_eq!(every.step(0.3), None);
    }
}
