//! Speed slider normalisation.

/// Default slider granularity, in percent.
pub const DEFAULT_SPEED_STEP: u8 = 5;

/// Normalises raw slider readings to an integer percentage in `0..=100`,
/// quantised to the slider's step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedControl {
    step: u8,
}

impl Default for SpeedControl {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_STEP)
    }
}

impl SpeedControl {
    /// A step of `0` is treated as `1` (no quantisation).
    pub fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, 100),
        }
    }

    pub fn step(&self) -> u8 {
        self.step
    }

    /// Clamp `raw` to `[0, 100]` and round it to the nearest step.
    ///
    /// The result always lies on the step grid, so when the step does not
    /// divide 100 the top value is the largest multiple below it.
    /// Returns `None` for NaN or infinite readings.
    pub fn normalize(&self, raw: f64) -> Option<u8> {
        if !raw.is_finite() {
            return None;
        }
        let step = f64::from(self.step);
        let top = f64::from(100 / self.step * self.step);
        let clamped = raw.clamp(0.0, 100.0);
        let quantized = ((clamped / step).round() * step).min(top);
        Some(quantized as u8)
    }

    /// Parse a textual reading, either a bare number (`"40"`) or the wire
    /// form (`"speed:40"`).
    pub fn parse(&self, text: &str) -> Option<u8> {
        let text = text.trim();
        let number = text.strip_prefix("speed:").unwrap_or(text);
        number.trim().parse::<f64>().ok().and_then(|v| self.normalize(v))
    }
}
