//! Single-channel automatic volume control (downward only)
//!
//! - look-ahead: audio is delayed so the gain lands before the peak
//! - hold: attenuation is frozen briefly after each burst, avoiding gain chatter between syllables
//! - soft knee: quadratic transition into attenuation around the target
//! - limiter: a hard clip just below full scale catches what is left

use crate::constants::SAMPLE_RATE;

/// Delay applied to audio so gain precedes peaks
const LOOKAHEAD_MS: f32 = 2.0;
/// Time constant for increasing attenuation
const ATTACK: f32 = 0.010;
/// Time constant for recovering from attenuation
const RELEASE: f32 = 0.150;
/// Envelope time constant of the level detector
const WINDOW: f32 = 0.020;
/// Hold time after each attenuation burst
const HOLD: f32 = 0.080;
/// Soft knee width (dB)
const KNEE_DB: f32 = 6.0;
/// Maximum attenuation (dB, positive)
pub const MAX_ATTEN_DB: f32 = 24.0;
/// Brick-wall peak limit (dBFS)
pub const LIMITER_DB: f32 = -0.1;
/// Time constant used while holding; large enough to freeze the gain
const FROZEN: f32 = 1e9;

pub struct AutoVolume {
    target_db: f32,
    offset_db: f32,
    limiter_linear: f32,
    /// RMS envelope (linear)
    envelope: f32,
    /// Applied attenuation (dB, ≤ 0)
    gain_db: f32,
    gain_linear: f32,
    /// Seconds left in hold
    hold_timer: f32,
    delay_line: Vec<f32>,
    delay_offset: usize,
}

impl AutoVolume {
    pub fn new(target_db: f32) -> Self {
        let lookahead_samples = ((LOOKAHEAD_MS * SAMPLE_RATE as f32) / 1000.0) as usize;

        Self {
            target_db,
            offset_db: 0.0,
            limiter_linear: 10f32.powf(LIMITER_DB / 20.0),
            envelope: 0.0,
            gain_db: 0.0,
            gain_linear: 1.0,
            hold_timer: 0.0,
            delay_line: vec![0.0; lookahead_samples.max(1)],
            delay_offset: 0,
        }
    }

    /// Reset envelope, gain and delay line
    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain_db = 0.0;
        self.gain_linear = 1.0;
        self.hold_timer = 0.0;
        self.delay_line.fill(0.0);
        self.delay_offset = 0;
    }

    pub fn target_db(&self) -> f32 {
        self.target_db
    }

    /// Change the target level; resets all state
    pub fn set_target_db(&mut self, target_db: f32) {
        self.target_db = target_db;
        self.reset();
    }

    pub fn offset_db(&self) -> f32 {
        self.offset_db
    }

    /// Change the manual gain trim; resets all state
    pub fn set_offset_db(&mut self, offset_db: f32) {
        self.offset_db = offset_db;
        self.reset();
    }

    /// Current attenuation in dB
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn gain_linear(&self) -> f32 {
        self.gain_linear
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn hold_timer(&self) -> f32 {
        self.hold_timer
    }

    /// Process one mono block in place
    pub fn process_block(&mut self, block: &mut [i16]) {
        if block.is_empty() {
            return;
        }

        // Block RMS
        let sum_sq: f32 = block
            .iter()
            .map(|&s| {
                let sample = s as f32 / i16::MAX as f32;
                sample * sample
            })
            .sum();
        let rms = (sum_sq / block.len() as f32).sqrt();

        // Envelope, one pole at block rate
        let block_sec = block.len() as f32 / SAMPLE_RATE as f32;
        let alpha_env = (-block_sec / WINDOW).exp();
        self.envelope = alpha_env * self.envelope + (1.0 - alpha_env) * rms;

        // Desired attenuation with soft knee
        let env_db = 20.0 * (self.envelope + f32::MIN_POSITIVE).log10();
        let diff_db = env_db - self.target_db;
        let mut err_db = 0.0;

        // The quadratic is centred half a knee below the target, so attenuation
        // steps in at -KNEE_DB / 8 as soon as the level exceeds the target.
        if diff_db > 0.0 {
            if diff_db >= KNEE_DB * 0.5 {
                err_db = -diff_db;
            } else {
                let x = diff_db + KNEE_DB * 0.5;
                err_db = -(x * x) / (2.0 * KNEE_DB);
            }
        }

        // Attack / hold / release
        let need_more_attenuation = err_db < self.gain_db;
        if need_more_attenuation {
            self.hold_timer = HOLD;
        } else if self.hold_timer > 0.0 {
            self.hold_timer = (self.hold_timer - block_sec).max(0.0);
        }

        let tc = if need_more_attenuation {
            ATTACK
        } else if self.hold_timer > 0.0 {
            FROZEN
        } else {
            RELEASE
        };

        let alpha_g = (-block_sec / tc).exp();
        self.gain_db = alpha_g * self.gain_db + (1.0 - alpha_g) * err_db;
        self.gain_db = self.gain_db.clamp(-MAX_ATTEN_DB, 0.0);
        self.gain_linear = 10f32.powf(self.gain_db / 20.0);

        let output_gain_linear = 10f32.powf((self.gain_db + self.offset_db) / 20.0);

        // Apply gain through the look-ahead delay, then limit
        for sample in block.iter_mut() {
            let dry = *sample as f32 / i16::MAX as f32;

            let delayed = self.delay_line[self.delay_offset];
            self.delay_line[self.delay_offset] = dry;
            self.delay_offset = (self.delay_offset + 1) % self.delay_line.len();

            let wet = (delayed * output_gain_linear).clamp(-self.limiter_linear, self.limiter_linear);
            *sample = (wet * i16::MAX as f32) as i16;
        }
    }
}

impl Default for AutoVolume {
    fn default() -> Self {
        Self::new(-18.0)
    }
}
