//! Mastering chain
//!
//! RMS-normalize each stem, trim the beat to the vocal plus a tail, sum the
//! vocal centered into the stereo beat, then compress, limit and clamp.
//! Every step is a pure function of its inputs and the configuration, so the
//! same stems always master to the same samples.

use super::onset::db_to_linear;
use crate::models::{AlignedVocalTrack, BeatAudio, FinalTrack, MasteredTrack, MasteringReport};
use dissforge_common::{FadeCurve, Fingerprint};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Silence floor used when reporting levels in dB
const MIN_LEVEL: f32 = 1e-10;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MasteringError {
    #[error("vocal sample rate {vocal} Hz does not match beat sample rate {beat} Hz")]
    SampleRateMismatch { vocal: u32, beat: u32 },

    #[error("nothing to master: vocal or beat stem is empty")]
    EmptyInput,
}

impl MasteringError {
    pub fn code(&self) -> &'static str {
        match self {
            MasteringError::SampleRateMismatch { .. } => "SampleRateMismatch",
            MasteringError::EmptyInput => "EmptyInput",
        }
    }
}

/// Mastering parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MasteringConfig {
    /// RMS level each stem is normalized to (dBFS)
    pub target_loudness_db: f32,
    pub vocal_gain: f32,
    pub beat_gain: f32,
    /// Compressor threshold above the loudness target (dB)
    pub compressor_threshold_offset_db: f32,
    pub compressor_ratio: f32,
    pub compressor_attack_ms: f32,
    pub compressor_release_ms: f32,
    /// Limiter ceiling and final hard clamp (dBFS)
    pub ceiling_db: f32,
    pub limiter_release_ms: f32,
    /// Beat kept past the end of the vocal
    pub tail_seconds: f32,
    /// Beat fade-out when it had to be trimmed
    pub fade_out_seconds: f32,
}

impl Default for MasteringConfig {
    fn default() -> Self {
        Self {
            target_loudness_db: -14.0,
            vocal_gain: 0.8,
            beat_gain: 0.6,
            compressor_threshold_offset_db: 3.0,
            compressor_ratio: 4.0,
            compressor_attack_ms: 10.0,
            compressor_release_ms: 120.0,
            ceiling_db: -1.0,
            limiter_release_ms: 60.0,
            tail_seconds: 2.0,
            fade_out_seconds: 1.0,
        }
    }
}

impl MasteringConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.target_loudness_db >= 0.0 {
            return Err("mastering.target_loudness_db must be below 0 dBFS".to_string());
        }
        if self.ceiling_db > 0.0 {
            return Err("mastering.ceiling_db must not exceed 0 dBFS".to_string());
        }
        if self.vocal_gain < 0.0 || self.beat_gain < 0.0 {
            return Err("mastering gains must not be negative".to_string());
        }
        if self.compressor_ratio < 1.0 {
            return Err("mastering.compressor_ratio must be >= 1".to_string());
        }
        if self.compressor_attack_ms <= 0.0
            || self.compressor_release_ms <= 0.0
            || self.limiter_release_ms <= 0.0
        {
            return Err("mastering attack/release times must be positive".to_string());
        }
        if self.tail_seconds < 0.0 || self.fade_out_seconds < 0.0 {
            return Err("mastering.tail_seconds and fade_out_seconds must not be negative".to_string());
        }
        Ok(())
    }
}

/// Final mix builder
pub struct MasteringChain {
    config: MasteringConfig,
}

impl MasteringChain {
    pub fn new(config: MasteringConfig) -> Self {
        Self { config }
    }

    /// Mix and master a vocal stem against a stereo beat
    pub fn master(
        &self,
        vocal: &AlignedVocalTrack,
        beat: &BeatAudio,
        source: Fingerprint,
    ) -> Result<MasteredTrack, MasteringError> {
        if vocal.sample_rate != beat.sample_rate {
            return Err(MasteringError::SampleRateMismatch {
                vocal: vocal.sample_rate,
                beat: beat.sample_rate,
            });
        }
        if vocal.samples.is_empty() || beat.samples.is_empty() {
            return Err(MasteringError::EmptyInput);
        }
        let sr = beat.sample_rate;
        let channels = beat.channels.max(1) as usize;

        let target = db_to_linear(self.config.target_loudness_db);
        let vocal_gain = normalization_gain(&vocal.samples, target) * self.config.vocal_gain;
        let beat_gain = normalization_gain(&beat.samples, target) * self.config.beat_gain;

        let vocal_frames = vocal.samples.len();
        let beat_frames = beat.frames();
        let tail = (self.config.tail_seconds * sr as f32).round() as usize;
        let frames = vocal_frames.max(beat_frames.min(vocal_frames + tail));

        let mut beat_env = vec![1.0f32; frames];
        if beat_frames > frames {
            let fade = ((self.config.fade_out_seconds * sr as f32).round() as usize).min(frames);
            FadeCurve::Linear.apply_fade_out(&mut beat_env, fade);
        }

        let mut mix = vec![0.0f32; frames * channels];
        for frame in 0..frames {
            let v = vocal.samples.get(frame).copied().unwrap_or(0.0) * vocal_gain;
            for ch in 0..channels {
                let b = beat
                    .samples
                    .get(frame * channels + ch)
                    .copied()
                    .unwrap_or(0.0);
                mix[frame * channels + ch] = b * beat_gain * beat_env[frame] + v;
            }
        }

        let compressor_reduction = self.compress(&mut mix, channels, sr);
        let limiter_reduction = self.limit(&mut mix, channels, sr);

        let ceiling = db_to_linear(self.config.ceiling_db);
        for sample in mix.iter_mut() {
            *sample = sample.clamp(-ceiling, ceiling);
        }

        let peak = mix.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        let rms = rms(&mix);
        let duration_seconds = frames as f64 / sr as f64;

        let report = MasteringReport {
            peak_db: to_db(peak),
            rms_db: to_db(rms),
            duration_seconds,
            sample_rate: sr,
            max_gain_reduction_db: (compressor_reduction + limiter_reduction) as f64,
            vocal_gain_db: to_db(vocal_gain),
            beat_gain_db: to_db(beat_gain),
        };
        debug!(
            peak_db = report.peak_db,
            rms_db = report.rms_db,
            duration_s = duration_seconds,
            gain_reduction_db = report.max_gain_reduction_db,
            "Mastering complete"
        );

        Ok(MasteredTrack {
            track: FinalTrack {
                samples: mix,
                sample_rate: sr,
                channels: channels as u16,
                duration_seconds,
                source,
            },
            report,
        })
    }

    /// Stereo-linked feed-forward compressor; returns the deepest reduction in dB
    fn compress(&self, mix: &mut [f32], channels: usize, sr: u32) -> f32 {
        let threshold_db = self.config.target_loudness_db + self.config.compressor_threshold_offset_db;
        let slope = 1.0 - 1.0 / self.config.compressor_ratio;
        let attack = smoothing(self.config.compressor_attack_ms, sr);
        let release = smoothing(self.config.compressor_release_ms, sr);

        let mut envelope = 0.0f32;
        let mut deepest = 0.0f32;
        for frame in mix.chunks_mut(channels) {
            let level = frame.iter().fold(0.0f32, |p, s| p.max(s.abs()));
            let coeff = if level > envelope { attack } else { release };
            envelope = coeff * envelope + (1.0 - coeff) * level;

            let over = to_db(envelope) as f32 - threshold_db;
            if over > 0.0 {
                let reduction = over * slope;
                deepest = deepest.max(reduction);
                let gain = db_to_linear(-reduction);
                for s in frame.iter_mut() {
                    *s *= gain;
                }
            }
        }
        deepest
    }

    /// Peak limiter, instant attack and exponential release; returns the deepest reduction in dB
    fn limit(&self, mix: &mut [f32], channels: usize, sr: u32) -> f32 {
        let ceiling = db_to_linear(self.config.ceiling_db);
        let release = smoothing(self.config.limiter_release_ms, sr);

        let mut gain = 1.0f32;
        let mut deepest = 0.0f32;
        for frame in mix.chunks_mut(channels) {
            let peak = frame.iter().fold(0.0f32, |p, s| p.max(s.abs()));
            let required = if peak > ceiling { ceiling / peak } else { 1.0 };
            let released = 1.0 - (1.0 - gain) * release;
            gain = required.min(released);
            if gain < 1.0 {
                deepest = deepest.max(-to_db(gain) as f32);
                for s in frame.iter_mut() {
                    *s *= gain;
                }
            }
        }
        deepest
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Gain bringing `samples` to `target` RMS; silent stems are left alone
fn normalization_gain(samples: &[f32], target: f32) -> f32 {
    let level = rms(samples);
    if level < 1e-6 {
        1.0
    } else {
        target / level
    }
}

/// One-pole smoothing coefficient for a time constant
fn smoothing(ms: f32, sr: u32) -> f32 {
    (-1.0 / (ms / 1000.0 * sr as f32)).exp()
}

fn to_db(level: f32) -> f64 {
    20.0 * (level.max(MIN_LEVEL) as f64).log10()
}
