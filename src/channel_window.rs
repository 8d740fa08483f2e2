//! Display intensity window shared by both channels.

/// Raw slider units per normalized unit (255 steps of 1/16).
pub const RAW_SCALE: f32 = 255.0 * 16.0;

/// Largest raw value a slider delivers.
pub const RAW_MAX: i32 = 255 * 16;

/// Normalized `[min, max]` intensity window, with `min <= max` at all times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelWindow {
    min: f32,
    max: f32,
}

impl Default for ChannelWindow {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl ChannelWindow {
    /// Window from raw slider values, clamped the same way the setters clamp.
    pub fn from_raw(min: i32, max: i32) -> Self {
        let mut window = Self::default();
        window.set_min(min);
        window.set_max(max);
        window
    }

    #[inline]
    fn normalize(raw: i32) -> f32 {
        raw.clamp(0, RAW_MAX) as f32 / RAW_SCALE
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Set the lower bound. Pushes `max` up if it would fall below.
    ///
    /// Returns `true` if either bound changed.
    pub fn set_min(&mut self, raw: i32) -> bool {
        let value = Self::normalize(raw);
        let before = *self;
        self.min = value;
        if self.min > self.max {
            self.max = self.min;
        }
        *self != before
    }

    /// Set the upper bound. Pulls `min` down if it would rise above.
    ///
    /// Returns `true` if either bound changed.
    pub fn set_max(&mut self, raw: i32) -> bool {
        let value = Self::normalize(raw);
        let before = *self;
        self.max = value;
        if self.max < self.min {
            self.min = self.max;
        }
        *self != before
    }

    /// `(min, max, unused)` as handed to the fragment stage.
    pub fn uniform(&self) -> [f32; 3] {
        [self.min, self.max, 1.0]
    }

    /// Map a raw 16-bit sample through the window into `[0, 1]`.
    pub fn map(&self, sample: u16) -> f32 {
        let v = f32::from(sample) / f32::from(u16::MAX);
        let span = self.max - self.min;
        if span <= f32::EPSILON {
            return if v >= self.max { 1.0 } else { 0.0 };
        }
        ((v - self.min) / span).clamp(0.0, 1.0)
    }
}
