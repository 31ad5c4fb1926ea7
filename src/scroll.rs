//! Easing for the lyric scroll position.

use std::time::Duration;

// The reference step: 20% of the remaining distance every ~60Hz frame.
const REFERENCE_TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSmoother {
    pub rate_per_tick: f64,
    pub snap_threshold: f64,
    pub max_duration: Duration,
}

impl Default for ScrollSmoother {
    fn default() -> Self {
        Self {
            rate_per_tick: 0.2,
            snap_threshold: 1.0,
            max_duration: Duration::from_secs(1),
        }
    }
}

impl ScrollSmoother {
    /// Move `current` toward `target` by the amount of easing that fits in
    /// `elapsed`. Snaps to `target` once the remaining distance is under the
    /// threshold.
    pub fn step(&self, current: f64, target: f64, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            return current;
        }
        let ticks = elapsed.as_secs_f64() / REFERENCE_TICK.as_secs_f64();
        let rate = self.rate_per_tick.clamp(f64::EPSILON, 1.0);
        let factor = 1.0 - (1.0 - rate).powf(ticks);

        let next = current + (target - current) * factor;
        if (target - next).abs() < self.snap_threshold {
            target
        } else {
            next
        }
    }
}

/// An in-progress animation toward one target. Retargeting restarts from
/// wherever the offset currently is.
#[derive(Debug, Clone)]
pub struct ScrollAnimation {
    smoother: ScrollSmoother,
    offset: f64,
    target: f64,
    elapsed: Duration,
}

impl ScrollAnimation {
    pub fn new(smoother: ScrollSmoother, offset: f64) -> Self {
        Self {
            smoother,
            offset,
            target: offset,
            elapsed: Duration::ZERO,
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.offset == self.target
    }

    pub fn retarget(&mut self, target: f64) {
        self.target = target;
        self.elapsed = Duration::ZERO;
    }

    pub fn tick(&mut self, dt: Duration) -> f64 {
        if self.is_settled() {
            return self.offset;
        }
        self.elapsed += dt;
        self.offset = if self.elapsed >= self.smoother.max_duration {
            self.target
        } else {
            self.smoother.step(self.offset, self.target, dt)
        };
        self.offset
    }
}

/// Geometry needed to turn a line index into a scroll offset that centers
/// the line in the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollLayout {
    pub line_height: f64,
    pub viewport_height: f64,
}

impl Default for ScrollLayout {
    fn default() -> Self {
        Self {
            line_height: 40.0,
            viewport_height: 600.0,
        }
    }
}

impl ScrollLayout {
    pub fn centered_offset(&self, index: usize) -> f64 {
        let line_top = index as f64 * self.line_height;
        (line_top + self.line_height / 2.0 - self.viewport_height / 2.0).max(0.0)
    }
}
