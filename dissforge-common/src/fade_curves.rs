//! Fade curves for crossfades and fade-outs
//!
//! Positions are normalized: 0.0 is the start of the fade, 1.0 the end.
//! Fade-in curves rise from 0.0 to 1.0, fade-out curves fall from 1.0 to 0.0.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Fade curve shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    Linear,

    /// v(t) = t², slow start, fast finish
    Exponential,

    /// v(t) = (1-t)² as a fade-out, fast start, slow finish
    Logarithmic,

    /// v(t) = 0.5 × (1 - cos(π × t))
    #[default]
    SCurve,

    /// v(t) = sin(t × π/2), constant perceived loudness when paired
    EqualPower,
}

impl FadeCurve {
    /// Gain multiplier for a fade-in at `position`
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            // Inverse of the quadratic fade-out shape
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Gain multiplier for a fade-out at `position`
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Multiply the first `len` samples of `samples` by a fade-in ramp
    pub fn apply_fade_in(&self, samples: &mut [f32], len: usize) {
        let len = len.min(samples.len());
        if len == 0 {
            return;
        }
        for (i, sample) in samples.iter_mut().take(len).enumerate() {
            *sample *= self.calculate_fade_in(i as f32 / len as f32);
        }
    }

    /// Multiply the last `len` samples of `samples` by a fade-out ramp
    ///
    /// The final sample is reached at position 1.0, so it lands on silence.
    pub fn apply_fade_out(&self, samples: &mut [f32], len: usize) {
        let len = len.min(samples.len());
        if len == 0 {
            return;
        }
        let start = samples.len() - len;
        let denom = len.saturating_sub(1).max(1) as f32;
        for (i, sample) in samples[start..].iter_mut().enumerate() {
            *sample *= self.calculate_fade_out(i as f32 / denom);
        }
    }

    /// Parse from a config string
    ///
    /// Accepts `linear`, `exponential`, `logarithmic`, `cosine` / `s_curve` /
    /// `scurve` / `s-curve`, and `equal_power` / `equalpower`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "exponential" => Some(FadeCurve::Exponential),
            "logarithmic" => Some(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            _ => None,
        }
    }
}
