//! Beat-locked vocal alignment
//!
//! Each lyric line is locked to a slot on the beat grid: its hinted start
//! snaps to the nearest subdivision point, its hinted duration is rounded to
//! whole subdivisions. The line's natural audio is then stretched into the
//! slot when the required ratio is inside the safety range, otherwise it is
//! truncated or padded with silence and the treatment is recorded.
//!
//! Slots never overlap: a line whose snapped start falls before the previous
//! line's end starts at that end instead.

use super::stretch::time_stretch;
use crate::models::{AlignedVocalTrack, BeatGrid, LineFit, LineSpan, LyricLine, Subdivision, SynthesizedVocals};
use dissforge_common::FadeCurve;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Aligner failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AlignmentError {
    #[error("no lyric line carries a target start time")]
    NoTimingHints,

    #[error("{lines} lyric lines but {spans} synthesized line spans")]
    LineCountMismatch { lines: usize, spans: usize },

    #[error("invalid aligner parameters: {0}")]
    InvalidParameters(String),

    #[error("line {line}: timing hint {value} s is outside the track horizon of {horizon:.3} s")]
    InvalidTimingHint { line: usize, value: f64, horizon: f64 },
}

impl AlignmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AlignmentError::NoTimingHints => "NoTimingHints",
            AlignmentError::LineCountMismatch { .. } => "LineCountMismatch",
            AlignmentError::InvalidParameters(_) => "InvalidParameters",
            AlignmentError::InvalidTimingHint { .. } => "InvalidTimingHint",
        }
    }
}

/// Aligner parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignerConfig {
    /// Smallest stretch ratio applied; anything below is truncated
    pub min_stretch: f64,
    /// Largest stretch ratio applied; anything above is padded
    pub max_stretch: f64,
    /// Fade length at each line edge
    pub crossfade_ms: f64,
    pub subdivision: Subdivision,
    pub crossfade_curve: FadeCurve,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            min_stretch: 0.75,
            max_stretch: 1.35,
            crossfade_ms: 5.0,
            subdivision: Subdivision::Beat,
            crossfade_curve: FadeCurve::SCurve,
        }
    }
}

impl AlignerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_stretch > 0.0 && self.min_stretch <= 1.0) {
            return Err(format!("aligner.min_stretch {} must be in (0, 1]", self.min_stretch));
        }
        if self.max_stretch < 1.0 || self.max_stretch <= self.min_stretch {
            return Err(format!(
                "aligner.max_stretch {} must be >= 1 and above min_stretch",
                self.max_stretch
            ));
        }
        if !(0.0..=100.0).contains(&self.crossfade_ms) {
            return Err("aligner.crossfade_ms must be within 0..=100".to_string());
        }
        Ok(())
    }
}

/// Planned slot of one line, in subdivision units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    start: i64,
    end: i64,
}

/// Fits synthesized lines onto a beat grid
pub struct VocalAligner {
    config: AlignerConfig,
}

impl VocalAligner {
    pub fn new(config: AlignerConfig) -> Result<Self, AlignmentError> {
        config.validate().map_err(AlignmentError::InvalidParameters)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    /// Build the beat-locked vocal stem
    pub fn align(
        &self,
        vocals: &SynthesizedVocals,
        lines: &[LyricLine],
        grid: &BeatGrid,
    ) -> Result<AlignedVocalTrack, AlignmentError> {
        if !lines.iter().any(|l| l.target_start_time.is_some()) {
            return Err(AlignmentError::NoTimingHints);
        }
        if lines.len() != vocals.lines.len() {
            return Err(AlignmentError::LineCountMismatch {
                lines: lines.len(),
                spans: vocals.lines.len(),
            });
        }

        let sample_rate = vocals.audio.sample_rate;
        let slots = self.plan_slots(vocals, lines, grid)?;
        let subdivision = self.config.subdivision;
        let to_sample = |n: i64| -> usize {
            (grid.subdivision_time(n, subdivision).max(0.0) * sample_rate as f64).round() as usize
        };

        let offsets: Vec<LineSpan> = slots
            .iter()
            .map(|slot| LineSpan::new(to_sample(slot.start), to_sample(slot.end)))
            .collect();
        let total = offsets.last().map(|s| s.end_sample).unwrap_or(0);
        let mut samples = vec![0.0f32; total];

        let fade_len = (self.config.crossfade_ms / 1000.0 * sample_rate as f64).round() as usize;
        let mut fits = Vec::with_capacity(lines.len());

        for (index, span) in offsets.iter().enumerate() {
            let natural = vocals.line_samples(index).unwrap_or(&[]);
            let (mut fitted, fit) = self.fit_line(natural, span.len(), sample_rate);

            match fit {
                LineFit::Truncated { ratio } => warn!(
                    line = index,
                    ratio,
                    "Line too long for its slot, truncating instead of stretching"
                ),
                LineFit::Padded { ratio } => warn!(
                    line = index,
                    ratio,
                    "Line too short for its slot, padding with silence instead of stretching"
                ),
                LineFit::Stretched { ratio } => debug!(line = index, ratio, "Line stretched"),
            }

            let edge = fade_len.min(fitted.len() / 4);
            self.config.crossfade_curve.apply_fade_in(&mut fitted, edge);
            self.config.crossfade_curve.apply_fade_out(&mut fitted, edge);

            samples[span.start_sample..span.end_sample].copy_from_slice(&fitted);
            fits.push(fit);
        }

        debug!(
            lines = lines.len(),
            samples = samples.len(),
            tempo_bpm = grid.tempo_bpm(),
            "Vocals aligned"
        );

        Ok(AlignedVocalTrack {
            samples,
            sample_rate,
            line_offsets: offsets,
            fits,
        })
    }

    /// Snap every line to grid subdivisions, keeping slots ordered and disjoint
    ///
    /// Hints must be finite and no later than the last detected beat plus
    /// the whole natural vocal length.
    fn plan_slots(
        &self,
        vocals: &SynthesizedVocals,
        lines: &[LyricLine],
        grid: &BeatGrid,
    ) -> Result<Vec<Slot>, AlignmentError> {
        let subdivision = self.config.subdivision;
        let step = grid.period() / subdivision.divisions() as f64;
        let horizon = grid.last_beat_time() + vocals.audio.duration_seconds();
        let check = |line: usize, value: f64| {
            if value.is_finite() && value <= horizon {
                Ok(value)
            } else {
                Err(AlignmentError::InvalidTimingHint { line, value, horizon })
            }
        };
        let mut slots: Vec<Slot> = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            let floor = slots
                .last()
                .map(|s| s.end)
                .unwrap_or_else(|| grid.first_subdivision(subdivision));
            let start = match line.target_start_time {
                Some(t) => grid
                    .nearest_subdivision(check(index, t)?.max(0.0), subdivision)
                    .max(floor),
                None => floor,
            };

            let duration = match line.target_duration.filter(|d| *d > 0.0) {
                Some(d) => check(index, d)?,
                None => vocals.natural_duration(index).unwrap_or(0.0),
            };
            let count = ((duration / step).round() as i64).max(1);

            slots.push(Slot {
                start,
                end: start + count,
            });
        }
        Ok(slots)
    }

    /// Fit natural audio into exactly `slot_len` samples
    fn fit_line(&self, natural: &[f32], slot_len: usize, sample_rate: u32) -> (Vec<f32>, LineFit) {
        let ratio = slot_len as f64 / natural.len().max(1) as f64;

        if natural.is_empty() || ratio > self.config.max_stretch {
            let mut out = natural.to_vec();
            out.resize(slot_len, 0.0);
            return (out, LineFit::Padded { ratio });
        }
        if ratio < self.config.min_stretch {
            return (natural[..slot_len].to_vec(), LineFit::Truncated { ratio });
        }

        let mut out = time_stretch(natural, sample_rate, ratio);
        out.resize(slot_len, 0.0);
        (out, LineFit::Stretched { ratio })
    }
}
