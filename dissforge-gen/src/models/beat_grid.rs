//! Beat grid
//!
//! Timestamps and tempo are computed together: a grid can only be built from
//! a strictly increasing timestamp sequence, and the tempo is derived from
//! its median spacing. There is no setter for either.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grid construction errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BeatGridError {
    #[error("a beat grid needs at least two beats, got {0}")]
    TooFewBeats(usize),

    #[error("beat timestamps must be finite, non-negative and strictly increasing (index {0})")]
    NotIncreasing(usize),

    #[error("downbeat index {0} is out of range")]
    DownbeatOutOfRange(usize),
}

/// Beat subdivision used when locking lines to the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Subdivision {
    #[default]
    Beat,
    HalfBeat,
}

impl Subdivision {
    pub fn divisions(&self) -> i64 {
        match self {
            Subdivision::Beat => 1,
            Subdivision::HalfBeat => 2,
        }
    }
}

#[derive(Deserialize)]
struct BeatGridRecord {
    beat_timestamps: Vec<f64>,
    downbeat_indices: Vec<usize>,
}

/// Rhythmic pulse of a beat track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BeatGridRecord")]
pub struct BeatGrid {
    tempo_bpm: f64,
    beat_timestamps: Vec<f64>,
    downbeat_indices: Vec<usize>,
}

impl TryFrom<BeatGridRecord> for BeatGrid {
    type Error = BeatGridError;

    fn try_from(record: BeatGridRecord) -> Result<Self, Self::Error> {
        BeatGrid::new(record.beat_timestamps, record.downbeat_indices)
    }
}

impl BeatGrid {
    /// Build a grid, deriving the tempo from the median inter-beat spacing
    pub fn new(beat_timestamps: Vec<f64>, downbeat_indices: Vec<usize>) -> Result<Self, BeatGridError> {
        if beat_timestamps.len() < 2 {
            return Err(BeatGridError::TooFewBeats(beat_timestamps.len()));
        }
        for (i, t) in beat_timestamps.iter().enumerate() {
            if !t.is_finite() || *t < 0.0 || (i > 0 && *t <= beat_timestamps[i - 1]) {
                return Err(BeatGridError::NotIncreasing(i));
            }
        }
        if let Some(bad) = downbeat_indices.iter().find(|i| **i >= beat_timestamps.len()) {
            return Err(BeatGridError::DownbeatOutOfRange(*bad));
        }

        let mut gaps: Vec<f64> = beat_timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        gaps.sort_by(f64::total_cmp);
        let median = gaps[gaps.len() / 2];

        Ok(Self {
            tempo_bpm: 60.0 / median,
            beat_timestamps,
            downbeat_indices,
        })
    }

    /// Uniform grid of `count` beats starting at `first` with `period` seconds per beat
    pub fn uniform(
        first: f64,
        period: f64,
        count: usize,
        downbeat_phase: usize,
        beats_per_bar: usize,
    ) -> Result<Self, BeatGridError> {
        let beat_timestamps: Vec<f64> = (0..count).map(|k| first + k as f64 * period).collect();
        let bar = beats_per_bar.max(1);
        let downbeat_indices = (0..count).filter(|k| k % bar == downbeat_phase % bar).collect();
        Self::new(beat_timestamps, downbeat_indices)
    }

    pub fn tempo_bpm(&self) -> f64 {
        self.tempo_bpm
    }

    pub fn beat_timestamps(&self) -> &[f64] {
        &self.beat_timestamps
    }

    pub fn downbeat_indices(&self) -> &[usize] {
        &self.downbeat_indices
    }

    /// Time of the last detected beat
    pub fn last_beat_time(&self) -> f64 {
        self.beat_timestamps[self.beat_timestamps.len() - 1]
    }

    /// Seconds per beat
    pub fn period(&self) -> f64 {
        60.0 / self.tempo_bpm
    }

    /// Time of beat `index`, extrapolated at the grid tempo outside the detected range
    pub fn beat_time(&self, index: i64) -> f64 {
        let last = self.beat_timestamps.len() as i64 - 1;
        if index < 0 {
            self.beat_timestamps[0] + index as f64 * self.period()
        } else if index > last {
            self.beat_timestamps[last as usize] + (index - last) as f64 * self.period()
        } else {
            self.beat_timestamps[index as usize]
        }
    }

    /// Time of subdivision point `n` (n = beat index × divisions + fraction)
    pub fn subdivision_time(&self, n: i64, subdivision: Subdivision) -> f64 {
        let div = subdivision.divisions();
        let beat = n.div_euclid(div);
        let frac = n.rem_euclid(div);
        let start = self.beat_time(beat);
        if frac == 0 {
            start
        } else {
            let next = self.beat_time(beat + 1);
            start + (next - start) * frac as f64 / div as f64
        }
    }

    /// Smallest subdivision point at or after t = 0
    pub fn first_subdivision(&self, subdivision: Subdivision) -> i64 {
        let step = self.period() / subdivision.divisions() as f64;
        let mut n = -((self.beat_timestamps[0] / step).floor() as i64);
        while self.subdivision_time(n, subdivision) < 0.0 {
            n += 1;
        }
        while self.subdivision_time(n - 1, subdivision) >= 0.0 {
            n -= 1;
        }
        n
    }

    /// Subdivision point closest to `t`, never before t = 0
    pub fn nearest_subdivision(&self, t: f64, subdivision: Subdivision) -> i64 {
        let step = self.period() / subdivision.divisions() as f64;
        let estimate = ((t - self.beat_timestamps[0]) / step).round() as i64;
        let mut best = estimate;
        let mut best_distance = f64::INFINITY;
        for n in estimate.saturating_sub(2)..=estimate.saturating_add(2) {
            let distance = (self.subdivision_time(n, subdivision) - t).abs();
            if distance < best_distance {
                best = n;
                best_distance = distance;
            }
        }
        best.max(self.first_subdivision(subdivision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_is_derived_from_spacing() {
        let grid = BeatGrid::uniform(0.1, 0.5, 16, 0, 4).unwrap();
        assert!((grid.tempo_bpm() - 120.0).abs() < 1e-9);
        assert_eq!(grid.downbeat_indices(), &[0, 4, 8, 12]);
    }

    #[test]
    fn test_rejects_non_increasing() {
        assert_eq!(
            BeatGrid::new(vec![0.0, 0.5, 0.5], vec![]),
            Err(BeatGridError::NotIncreasing(2))
        );
        assert_eq!(BeatGrid::new(vec![1.0], vec![]), Err(BeatGridError::TooFewBeats(1)));
        assert_eq!(
            BeatGrid::new(vec![0.0, 0.5], vec![2]),
            Err(BeatGridError::DownbeatOutOfRange(2))
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let bad = r#"{"tempo_bpm": 999.0, "beat_timestamps": [1.0, 0.5], "downbeat_indices": []}"#;
        assert!(serde_json::from_str::<BeatGrid>(bad).is_err());

        let good = r#"{"tempo_bpm": 1.0, "beat_timestamps": [0.0, 0.5, 1.0], "downbeat_indices": [0]}"#;
        let grid: BeatGrid = serde_json::from_str(good).unwrap();
        // Stored tempo is ignored; it is always re-derived
        assert!((grid.tempo_bpm() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_subdivision_points_extrapolate() {
        let grid = BeatGrid::uniform(0.2, 0.5, 4, 0, 4).unwrap();
        assert!((grid.subdivision_time(3, Subdivision::HalfBeat) - 0.95).abs() < 1e-9);
        assert!((grid.beat_time(6) - 3.2).abs() < 1e-9);
        assert_eq!(grid.first_subdivision(Subdivision::Beat), 0);
        assert_eq!(grid.first_subdivision(Subdivision::HalfBeat), 0);
        assert_eq!(grid.nearest_subdivision(1.28, Subdivision::Beat), 2);
        assert_eq!(grid.nearest_subdivision(1.28, Subdivision::HalfBeat), 4);
        assert_eq!(grid.nearest_subdivision(0.0, Subdivision::Beat), 0);
    }

    #[test]
    fn test_nearest_subdivision_saturates_on_extreme_times() {
        let grid = BeatGrid::uniform(0.2, 0.5, 4, 0, 4).unwrap();
        assert!(grid.nearest_subdivision(1e300, Subdivision::Beat) > 1_000_000);
        assert!(grid.nearest_subdivision(1e300, Subdivision::HalfBeat) > 1_000_000);
        assert_eq!(grid.nearest_subdivision(-1e300, Subdivision::Beat), 0);
        assert!((grid.last_beat_time() - 1.7).abs() < 1e-9);
    }
}
