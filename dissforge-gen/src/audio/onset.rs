//! Onset/tempo analysis
//!
//! Algorithm:
//! 1. STFT magnitude frames (Hann window), log-compressed
//! 2. Spectral flux: half-wave rectified frame-to-frame magnitude increase,
//!    gated to zero on frames quieter than the silence floor
//! 3. Peak picking against a moving-average threshold, with a minimum gap
//! 4. Dominant period from clustered inter-onset intervals
//! 5. Octave resolution among {P, P/2, 2P}: largest fraction of onsets within
//!    tolerance of the projected grid, ties broken by grid occupancy
//! 6. Phase anchored on the strongest onset near the start, period refined
//!    by least squares over matched onsets
//! 7. Uniform grid projection over the whole track, downbeat phase picked by
//!    accent strength

use crate::models::{BeatAudio, BeatGrid};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use thiserror::Error;
use tracing::debug;

/// Analyzer failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("beat audio is empty or shorter than one analysis frame")]
    EmptyInput,

    #[error("no reliable tempo: {found} consistent onsets, need at least {required}")]
    NoReliableTempo { found: usize, required: usize },

    #[error("invalid analyzer parameters: {0}")]
    InvalidParameters(String),
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::EmptyInput => "EmptyInput",
            AnalysisError::NoReliableTempo { .. } => "NoReliableTempo",
            AnalysisError::InvalidParameters(_) => "InvalidParameters",
        }
    }
}

/// Analyzer parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Fewer consistent onsets than this means no usable tempo
    pub min_onsets: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Onset-to-grid distance counted as a match
    pub grid_tolerance_ms: f64,
    /// Frames below this RMS level contribute no flux
    pub silence_floor_db: f32,
    /// Threshold above the local mean of the normalized envelope
    pub peak_threshold: f32,
    pub min_onset_gap_ms: f64,
    pub beats_per_bar: usize,
    /// How many beats from the first onset to search for the phase anchor
    pub anchor_window_beats: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            hop_size: 512,
            min_onsets: 8,
            min_bpm: 60.0,
            max_bpm: 200.0,
            grid_tolerance_ms: 50.0,
            silence_floor_db: -60.0,
            peak_threshold: 0.1,
            min_onset_gap_ms: 60.0,
            beats_per_bar: 4,
            anchor_window_beats: 4,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 64 {
            return Err(format!("analyzer.fft_size {} must be a power of two >= 64", self.fft_size));
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size {
            return Err("analyzer.hop_size must be in 1..=fft_size".to_string());
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return Err("analyzer.min_bpm must be positive and below max_bpm".to_string());
        }
        if self.min_onsets < 2 {
            return Err("analyzer.min_onsets must be at least 2".to_string());
        }
        if self.grid_tolerance_ms <= 0.0 {
            return Err("analyzer.grid_tolerance_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// One detected onset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Onset {
    /// Seconds
    pub time: f64,
    /// Normalized envelope height (0..=1)
    pub strength: f32,
}

#[derive(Debug, Clone, Copy)]
struct GridMatch {
    index: i64,
    time: f64,
    strength: f32,
}

/// Candidate tempo scored against the onsets
#[derive(Debug, Clone, Copy)]
struct TempoCandidate {
    period: f64,
    anchor: f64,
    hit_fraction: f64,
    occupancy: f64,
}

/// Beat-grid extractor
pub struct OnsetTempoAnalyzer {
    config: AnalyzerConfig,
}

impl OnsetTempoAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
        config.validate().map_err(AnalysisError::InvalidParameters)?;
        Ok(Self { config })
    }

    /// Analyze a stereo beat via its mono downmix
    pub fn analyze_beat(&self, beat: &BeatAudio) -> Result<BeatGrid, AnalysisError> {
        self.analyze(&beat.mono_downmix(), beat.sample_rate)
    }

    /// Extract the beat grid of a mono signal
    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Result<BeatGrid, AnalysisError> {
        if sample_rate == 0 || samples.len() < self.config.fft_size {
            return Err(AnalysisError::EmptyInput);
        }
        let duration = samples.len() as f64 / sample_rate as f64;

        let onsets = self.detect_onsets(samples, sample_rate);
        debug!(onsets = onsets.len(), duration_s = duration, "Onset detection complete");

        let required = self.config.min_onsets;
        if onsets.len() < required {
            return Err(AnalysisError::NoReliableTempo {
                found: onsets.len(),
                required,
            });
        }

        let period = self
            .dominant_period(&onsets)
            .ok_or(AnalysisError::NoReliableTempo {
                found: 0,
                required,
            })?;

        let candidate = self.resolve_octave(period, &onsets);
        let (period, anchor) = self.refine(candidate.period, candidate.anchor, &onsets);

        let matched = self.matched_onsets(period, anchor, &onsets);
        if matched.len() < required {
            return Err(AnalysisError::NoReliableTempo {
                found: matched.len(),
                required,
            });
        }

        // Project the grid back to t >= 0 and forward to the end of the track
        let first_index = -(anchor / period).floor() as i64;
        let first = anchor + first_index as f64 * period;
        let count = ((duration - first) / period).floor() as usize + 1;
        if count < 2 {
            return Err(AnalysisError::NoReliableTempo {
                found: matched.len(),
                required,
            });
        }

        let bar = self.config.beats_per_bar.max(1);
        let mut accents = vec![0.0f32; bar];
        for m in &matched {
            let index = m.index - first_index;
            accents[index.rem_euclid(bar as i64) as usize] += m.strength;
        }
        let downbeat_phase = accents
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, a)| if *a > best.1 { (i, *a) } else { best })
            .0;

        debug!(
            tempo_bpm = 60.0 / period,
            first_beat = first,
            beats = count,
            matched = matched.len(),
            "Beat grid projected"
        );

        BeatGrid::uniform(first, period, count, downbeat_phase, bar)
            .map_err(|e| AnalysisError::InvalidParameters(e.to_string()))
    }

    /// Spectral flux envelope, one value per hop
    pub fn onset_envelope(&self, samples: &[f32]) -> Vec<f32> {
        let n = self.config.fft_size;
        let hop = self.config.hop_size;
        if samples.len() < n {
            return Vec::new();
        }
        let frames = (samples.len() - n) / hop + 1;
        let bins = n / 2 + 1;
        let window: Vec<f32> = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
            .collect();
        let floor = db_to_linear(self.config.silence_floor_db);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);

        let mut buffer = vec![Complex::new(0.0f32, 0.0); n];
        let mut previous = vec![0.0f32; bins];
        let mut current = vec![0.0f32; bins];
        let mut envelope = Vec::with_capacity(frames);

        for frame in 0..frames {
            let chunk = &samples[frame * hop..frame * hop + n];
            let rms = (chunk.iter().map(|s| s * s).sum::<f32>() / n as f32).sqrt();

            for ((slot, sample), w) in buffer.iter_mut().zip(chunk).zip(&window) {
                *slot = Complex::new(sample * w, 0.0);
            }
            fft.process(&mut buffer);

            let mut flux = 0.0f32;
            for (bin, magnitude) in current.iter_mut().enumerate() {
                *magnitude = (1.0 + 100.0 * buffer[bin].norm()).ln();
                let rise = *magnitude - previous[bin];
                if rise > 0.0 {
                    flux += rise;
                }
            }
            envelope.push(if rms < floor { 0.0 } else { flux });
            std::mem::swap(&mut previous, &mut current);
        }

        envelope
    }

    /// Onsets picked from the normalized flux envelope
    pub fn detect_onsets(&self, samples: &[f32], sample_rate: u32) -> Vec<Onset> {
        let envelope = self.onset_envelope(samples);
        let max = envelope.iter().cloned().fold(0.0f32, f32::max);
        if max <= f32::EPSILON {
            return Vec::new();
        }
        let normalized: Vec<f32> = envelope.iter().map(|v| v / max).collect();

        let hop_seconds = self.config.hop_size as f64 / sample_rate as f64;
        let center_offset = self.config.fft_size as f64 / 2.0 / sample_rate as f64;
        let min_gap = self.config.min_onset_gap_ms / 1000.0;
        const PEAK_RADIUS: usize = 3;
        const MEAN_RADIUS: usize = 16;

        let mut onsets: Vec<Onset> = Vec::new();
        for i in 0..normalized.len() {
            let value = normalized[i];
            if value <= 0.0 {
                continue;
            }
            let lo = i.saturating_sub(PEAK_RADIUS);
            let hi = (i + PEAK_RADIUS + 1).min(normalized.len());
            if normalized[lo..hi].iter().any(|v| *v > value) {
                continue;
            }

            let mlo = i.saturating_sub(MEAN_RADIUS);
            let mhi = (i + MEAN_RADIUS + 1).min(normalized.len());
            let mean = normalized[mlo..mhi].iter().sum::<f32>() / (mhi - mlo) as f32;
            if value < mean + self.config.peak_threshold {
                continue;
            }

            let time = i as f64 * hop_seconds + center_offset;
            match onsets.last_mut() {
                Some(last) if time - last.time < min_gap => {
                    // Plateau or double trigger: keep the stronger one
                    if value > last.strength {
                        *last = Onset { time, strength: value };
                    }
                }
                _ => onsets.push(Onset { time, strength: value }),
            }
        }
        onsets
    }

    /// Most consistent inter-onset interval within the BPM range
    fn dominant_period(&self, onsets: &[Onset]) -> Option<f64> {
        let min_period = 60.0 / self.config.max_bpm;
        let max_period = 60.0 / self.config.min_bpm;
        const NEIGHBOURS: usize = 8;
        const CLUSTER_WIDTH: f64 = 0.015;

        let mut gaps = Vec::new();
        for (i, a) in onsets.iter().enumerate() {
            for b in onsets.iter().skip(i + 1).take(NEIGHBOURS) {
                let gap = b.time - a.time;
                if gap > max_period {
                    break;
                }
                if gap >= min_period {
                    gaps.push(gap);
                }
            }
        }
        if gaps.is_empty() {
            return None;
        }
        gaps.sort_by(f64::total_cmp);

        // Greedy clustering over sorted gaps; the biggest cluster wins
        let mut best: Option<(usize, f64)> = None;
        let mut start = 0;
        while start < gaps.len() {
            let mut end = start + 1;
            while end < gaps.len() && gaps[end] - gaps[start] <= CLUSTER_WIDTH {
                end += 1;
            }
            let count = end - start;
            let mean = gaps[start..end].iter().sum::<f64>() / count as f64;
            if best.map_or(true, |(c, _)| count > c) {
                best = Some((count, mean));
            }
            start = end;
        }
        best.map(|(_, mean)| mean)
    }

    /// Choose among half, same and double tempo
    fn resolve_octave(&self, period: f64, onsets: &[Onset]) -> TempoCandidate {
        let min_period = 60.0 / self.config.max_bpm * 0.999;
        let max_period = 60.0 / self.config.min_bpm * 1.001;
        let mut candidates: Vec<TempoCandidate> = [period, period / 2.0, period * 2.0]
            .into_iter()
            .filter(|p| (min_period..=max_period).contains(p))
            .map(|p| self.score(p, onsets))
            .collect();
        if candidates.is_empty() {
            candidates.push(self.score(period, onsets));
        }

        const HIT_MARGIN: f64 = 0.05;
        let best_hit = candidates
            .iter()
            .map(|c| c.hit_fraction)
            .fold(0.0f64, f64::max);
        let chosen = candidates
            .iter()
            .filter(|c| c.hit_fraction >= best_hit - HIT_MARGIN)
            .fold(None::<TempoCandidate>, |best, c| match best {
                Some(b) if b.occupancy >= c.occupancy => Some(b),
                _ => Some(*c),
            })
            .unwrap_or(candidates[0]);

        debug!(
            period = chosen.period,
            hit_fraction = chosen.hit_fraction,
            occupancy = chosen.occupancy,
            "Tempo octave resolved"
        );
        chosen
    }

    fn score(&self, period: f64, onsets: &[Onset]) -> TempoCandidate {
        let anchor = self.anchor(period, onsets);
        let tolerance = self.config.grid_tolerance_ms / 1000.0;

        let mut hits = 0usize;
        let mut occupied = std::collections::BTreeSet::new();
        for onset in onsets {
            let k = ((onset.time - anchor) / period).round();
            if (onset.time - (anchor + k * period)).abs() <= tolerance {
                hits += 1;
                occupied.insert(k as i64);
            }
        }

        let first = onsets[0].time;
        let last = onsets[onsets.len() - 1].time;
        let k_first = ((first - anchor) / period - tolerance / period).ceil() as i64;
        let k_last = ((last - anchor) / period + tolerance / period).floor() as i64;
        let grid_points = (k_last - k_first + 1).max(1) as f64;

        TempoCandidate {
            period,
            anchor,
            hit_fraction: hits as f64 / onsets.len() as f64,
            occupancy: occupied.len() as f64 / grid_points,
        }
    }

    /// Strongest onset within the first few beats
    fn anchor(&self, period: f64, onsets: &[Onset]) -> f64 {
        let window_end = onsets[0].time + period * self.config.anchor_window_beats as f64;
        onsets
            .iter()
            .take_while(|o| o.time <= window_end)
            .fold(onsets[0], |best, o| if o.strength > best.strength { *o } else { best })
            .time
    }

    /// Least-squares fit of t = t0 + k·P over matched onsets
    fn refine(&self, period: f64, anchor: f64, onsets: &[Onset]) -> (f64, f64) {
        let matched = self.matched_onsets(period, anchor, onsets);
        let n = matched.len() as f64;
        if matched.len() < 2 {
            return (period, anchor);
        }
        let points: Vec<(f64, f64)> = matched.iter().map(|m| (m.index as f64, m.time)).collect();

        let mean_k = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_t = points.iter().map(|p| p.1).sum::<f64>() / n;
        let var_k = points.iter().map(|p| (p.0 - mean_k).powi(2)).sum::<f64>();
        if var_k <= f64::EPSILON {
            return (period, anchor);
        }
        let cov = points
            .iter()
            .map(|p| (p.0 - mean_k) * (p.1 - mean_t))
            .sum::<f64>();
        let slope = cov / var_k;
        let intercept = mean_t - slope * mean_k;

        if (slope - period).abs() > period * 0.1 {
            return (period, anchor);
        }
        (slope, intercept)
    }

    fn is_match(&self, period: f64, anchor: f64, time: f64) -> bool {
        let tolerance = self.config.grid_tolerance_ms / 1000.0;
        let k = ((time - anchor) / period).round();
        (time - (anchor + k * period)).abs() <= tolerance
    }

    /// Every onset that lands on the grid, indexed relative to the anchor
    fn matched_onsets(&self, period: f64, anchor: f64, onsets: &[Onset]) -> Vec<GridMatch> {
        onsets
            .iter()
            .filter(|o| self.is_match(period, anchor, o.time))
            .map(|o| GridMatch {
                index: ((o.time - anchor) / period).round() as i64,
                time: o.time,
                strength: o.strength,
            })
            .collect()
    }
}

pub(crate) fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22_050;

    /// Decaying 1 kHz bursts at the given times
    fn clicks(times: &[f64], duration: f64, amplitude: f32) -> Vec<f32> {
        let mut samples = vec![0.0f32; (duration * SR as f64) as usize];
        let burst = (0.03 * SR as f64) as usize;
        for t in times {
            let start = (t * SR as f64) as usize;
            for i in 0..burst {
                if let Some(s) = samples.get_mut(start + i) {
                    let env = (-(i as f32) / (burst as f32 / 5.0)).exp();
                    *s += amplitude * env * (2.0 * PI * 1000.0 * i as f32 / SR as f32).sin();
                }
            }
        }
        samples
    }

    fn analyzer() -> OnsetTempoAnalyzer {
        OnsetTempoAnalyzer::new(AnalyzerConfig::default()).unwrap()
    }

    #[test]
    fn test_detects_each_click() {
        let times: Vec<f64> = (0..8).map(|k| 0.25 + k as f64 * 0.5).collect();
        let onsets = analyzer().detect_onsets(&clicks(&times, 4.5, 0.8), SR);
        assert_eq!(onsets.len(), 8);
        for (onset, expected) in onsets.iter().zip(&times) {
            assert!((onset.time - expected).abs() < 0.03, "{} vs {}", onset.time, expected);
        }
    }

    #[test]
    fn test_120_bpm_grid() {
        let times: Vec<f64> = (0..16).map(|k| 0.1 + k as f64 * 0.5).collect();
        let grid = analyzer().analyze(&clicks(&times, 8.5, 0.8), SR).unwrap();

        assert!((grid.tempo_bpm() - 120.0).abs() < 1.5, "tempo {}", grid.tempo_bpm());
        assert!(grid.beat_timestamps().windows(2).all(|w| w[1] > w[0]));
        let nearest = grid
            .beat_timestamps()
            .iter()
            .map(|b| (b - 0.1).abs())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest < 0.03);
    }

    #[test]
    fn test_octave_prefers_full_occupancy() {
        // Every beat present: half tempo matches only half the onsets,
        // double tempo leaves every other grid point empty.
        let times: Vec<f64> = (0..20).map(|k| 0.2 + k as f64 * 0.6).collect();
        let grid = analyzer().analyze(&clicks(&times, 12.5, 0.8), SR).unwrap();
        assert!((grid.tempo_bpm() - 100.0).abs() < 1.5, "tempo {}", grid.tempo_bpm());
    }

    #[test]
    fn test_near_silence_has_no_tempo() {
        let samples: Vec<f32> = (0..SR as usize * 5)
            .map(|i| 1e-5 * ((i * 7919 % 1000) as f32 / 500.0 - 1.0))
            .collect();
        let err = analyzer().analyze(&samples, SR).unwrap_err();
        assert!(matches!(err, AnalysisError::NoReliableTempo { .. }), "{:?}", err);
    }

    #[test]
    fn test_steady_tone_has_no_tempo() {
        let samples: Vec<f32> = (0..SR as usize * 4)
            .map(|i| 0.5 * (2.0 * PI * 220.0 * i as f32 / SR as f32).sin())
            .collect();
        assert!(matches!(
            analyzer().analyze(&samples, SR),
            Err(AnalysisError::NoReliableTempo { .. })
        ));
    }

    #[test]
    fn test_too_short_is_empty_input() {
        assert_eq!(analyzer().analyze(&[0.0; 100], SR), Err(AnalysisError::EmptyInput));
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = AnalyzerConfig {
            fft_size: 1000,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            OnsetTempoAnalyzer::new(config),
            Err(AnalysisError::InvalidParameters(_))
        ));
    }
}
