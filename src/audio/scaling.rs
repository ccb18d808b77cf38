//! Adaptive scaling of wide microphone samples into int16 range
//!
//! There is no lookahead: the tracked peak jumps up immediately on a loud
//! sample and decays slowly afterwards, so the gain only ever attenuates.

/// Widen a raw microphone word to 16 + `gain_bits` significant bits.
///
/// The microphone delivers 24 significant bits below the sign bit; the top
/// 16 + `gain_bits` of them are kept for the scaler to compress.
pub fn microphone_sample(word: i32, gain_bits: u8) -> i32 {
    word.wrapping_shl(1) >> (16 - gain_bits.min(16) as u32)
}

/// Peak-tracking sample scaler
#[derive(Debug, Clone)]
pub struct AdaptiveScaler {
    smoothing_factor: f32,
    smoothed_peak: f32,
}

impl AdaptiveScaler {
    pub fn new(smoothing_factor: f32) -> Self {
        Self {
            smoothing_factor,
            smoothed_peak: 1.0,
        }
    }

    /// Forget the tracked peak; called at the start of every capture session
    pub fn reset(&mut self) {
        self.smoothed_peak = 1.0;
    }

    pub fn smoothed_peak(&self) -> f32 {
        self.smoothed_peak
    }

    /// Scale one raw sample into int16 range
    pub fn scale(&mut self, sample: i32) -> i16 {
        let abs_sample = (sample as f32).abs();

        if abs_sample > self.smoothed_peak {
            self.smoothed_peak = abs_sample;
        } else {
            self.smoothed_peak = self.smoothed_peak * (1.0 - self.smoothing_factor)
                + abs_sample * self.smoothing_factor;
        }
        if self.smoothed_peak < 1.0 {
            self.smoothed_peak = 1.0;
        }

        let gain = (i16::MAX as f32 / self.smoothed_peak).min(1.0);

        ((sample as f32 * gain) as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}
