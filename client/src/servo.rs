//! Local model of one servo output on the remote device

pub const DEFAULT_STEERING: f32 = 0.5;
pub const DEFAULT_IDLE_STEERING: f32 = 0.5;
pub const DEFAULT_MIN_PULSE_WIDTH_US: f32 = 1000.0;
pub const DEFAULT_MAX_PULSE_WIDTH_US: f32 = 2000.0;
/// Largest width where a 1us step is still exact in f32
pub const MAX_PULSE_WIDTH_US: f32 = 16_777_215.0;
/// Negative smoothing disables smoothing on the server
pub const SMOOTHING_DISABLED: f32 = -1.0;

/// Configuration of a single servo channel
///
/// Invariants held after every setter:
/// - `steering` and `idle_steering` are within [0, 1]
/// - `0 <= min_pulse_width < max_pulse_width <= MAX_PULSE_WIDTH_US`
///
/// NaN inputs are ignored and leave the field unchanged, as are infinite
/// pulse widths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoConfig {
    steering: f32,
    idle_steering: f32,
    min_pulse_width: f32,
    max_pulse_width: f32,
    smoothing: f32,
}

impl ServoConfig {
    /// Builds a config by applying each setter in turn, so out-of-range
    /// arguments are clamped the same way later updates are
    pub fn new(steering: f32, min_width_us: f32, max_width_us: f32, idle_steering: f32) -> Self {
        let mut config = Self::default();
        config.set_steering(steering);
        config.set_min_width(min_width_us);
        config.set_max_width(max_width_us);
        config.set_idle_steering(idle_steering);
        config
    }

    pub fn steering(&self) -> f32 {
        self.steering
    }

    pub fn idle_steering(&self) -> f32 {
        self.idle_steering
    }

    pub fn min_width(&self) -> f32 {
        self.min_pulse_width
    }

    pub fn max_width(&self) -> f32 {
        self.max_pulse_width
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Pulse width in microseconds produced by the current steering
    pub fn pulse_width(&self) -> f32 {
        (self.max_pulse_width - self.min_pulse_width) * self.steering + self.min_pulse_width
    }

    pub fn set_steering(&mut self, steering: f32) {
        if !steering.is_nan() {
            self.steering = steering.clamp(0.0, 1.0);
        }
    }

    pub fn set_idle_steering(&mut self, idle_steering: f32) {
        if !idle_steering.is_nan() {
            self.idle_steering = idle_steering.clamp(0.0, 1.0);
        }
    }

    pub fn set_min_width(&mut self, min_width_us: f32) {
        if !min_width_us.is_finite() {
            return;
        }
        let min = min_width_us.clamp(0.0, MAX_PULSE_WIDTH_US - 1.0);
        if min >= self.max_pulse_width {
            self.max_pulse_width = min + 1.0;
        }
        self.min_pulse_width = min;
    }

    pub fn set_max_width(&mut self, max_width_us: f32) {
        if !max_width_us.is_finite() {
            return;
        }
        // min cannot go below zero, so max needs room for it
        let max = max_width_us.clamp(1.0, MAX_PULSE_WIDTH_US);
        if max <= self.min_pulse_width {
            self.min_pulse_width = max - 1.0;
        }
        self.max_pulse_width = max;
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        if !smoothing.is_nan() {
            self.smoothing = smoothing;
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            steering: DEFAULT_STEERING,
            idle_steering: DEFAULT_IDLE_STEERING,
            min_pulse_width: DEFAULT_MIN_PULSE_WIDTH_US,
            max_pulse_width: DEFAULT_MAX_PULSE_WIDTH_US,
            smoothing: SMOOTHING_DISABLED,
        }
    }
}
