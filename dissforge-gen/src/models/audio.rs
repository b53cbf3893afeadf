//! Audio buffers passed between stages
//!
//! Sample vectors are serialized as base64 of little-endian f32 bytes so that
//! persisted artifacts stay compact and bit-exact.

use dissforge_common::Fingerprint;
use serde::{Deserialize, Serialize};

/// Serde adapter for `Vec<f32>` as base64 little-endian bytes
pub mod sample_encoding {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(samples: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(text.as_bytes()).map_err(de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(de::Error::custom(format!(
                "sample payload length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Mono PCM buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonoAudio {
    #[serde(with = "sample_encoding")]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Beat stem, interleaved stereo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatAudio {
    #[serde(with = "sample_encoding")]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl BeatAudio {
    /// Build a stereo beat from interleaved samples with `channels` channels
    ///
    /// Mono input is duplicated; extra channels beyond two are folded into
    /// left/right by averaging odd/even channels.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut stereo = Vec::with_capacity(frames * 2);
        for frame in samples.chunks_exact(channels) {
            let (left, right) = match channels {
                1 => (frame[0], frame[0]),
                2 => (frame[0], frame[1]),
                _ => {
                    let (mut l, mut r, mut nl, mut nr) = (0.0f32, 0.0f32, 0u32, 0u32);
                    for (ch, sample) in frame.iter().enumerate() {
                        if ch % 2 == 0 {
                            l += sample;
                            nl += 1;
                        } else {
                            r += sample;
                            nr += 1;
                        }
                    }
                    (l / nl.max(1) as f32, r / nr.max(1) as f32)
                }
            };
            stereo.push(left);
            stereo.push(right);
        }
        Self {
            samples: stereo,
            sample_rate,
            channels: 2,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average of all channels, for analysis
    pub fn mono_downmix(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Half-open sample range `[start_sample, end_sample)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start_sample: usize,
    pub end_sample: usize,
}

impl LineSpan {
    pub fn new(start_sample: usize, end_sample: usize) -> Self {
        Self {
            start_sample,
            end_sample,
        }
    }

    pub fn len(&self) -> usize {
        self.end_sample.saturating_sub(self.start_sample)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw TTS output: one buffer plus where each line sits in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedVocals {
    pub audio: MonoAudio,
    pub lines: Vec<LineSpan>,
}

impl SynthesizedVocals {
    /// Natural spoken duration of line `index` in seconds
    pub fn natural_duration(&self, index: usize) -> Option<f64> {
        let span = self.lines.get(index)?;
        Some(span.len() as f64 / self.audio.sample_rate.max(1) as f64)
    }

    pub fn line_samples(&self, index: usize) -> Option<&[f32]> {
        let span = self.lines.get(index)?;
        self.audio.samples.get(span.start_sample..span.end_sample)
    }
}

/// How the aligner fitted one line into its slot
///
/// `ratio` is always the required ratio (slot duration / natural duration),
/// whether or not it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "treatment", rename_all = "snake_case")]
pub enum LineFit {
    /// Time-stretched by `ratio`
    Stretched { ratio: f64 },
    /// Ratio below the safety range; natural audio cut at the slot end
    Truncated { ratio: f64 },
    /// Ratio above the safety range; natural audio followed by silence
    Padded { ratio: f64 },
}

impl LineFit {
    pub fn required_ratio(&self) -> f64 {
        match self {
            LineFit::Stretched { ratio }
            | LineFit::Truncated { ratio }
            | LineFit::Padded { ratio } => *ratio,
        }
    }

    /// Stretch ratio actually applied to the audio (1.0 when not stretched)
    pub fn applied_ratio(&self) -> f64 {
        match self {
            LineFit::Stretched { ratio } => *ratio,
            LineFit::Truncated { .. } | LineFit::Padded { .. } => 1.0,
        }
    }
}

/// Beat-locked vocal stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedVocalTrack {
    #[serde(with = "sample_encoding")]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Indexed by lyric line
    pub line_offsets: Vec<LineSpan>,
    /// Indexed by lyric line
    pub fits: Vec<LineFit>,
}

impl AlignedVocalTrack {
    /// Offsets strictly increasing, non-overlapping, non-empty and within the buffer
    pub fn offsets_are_valid(&self) -> bool {
        let mut previous_end = 0usize;
        for (i, span) in self.line_offsets.iter().enumerate() {
            if span.is_empty() || span.end_sample > self.samples.len() {
                return false;
            }
            if i > 0 && span.start_sample < previous_end {
                return false;
            }
            previous_end = span.end_sample;
        }
        true
    }
}

/// Mastered stereo mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalTrack {
    /// Interleaved
    #[serde(with = "sample_encoding")]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_seconds: f64,
    /// Identity of the request this track was generated for
    pub source: Fingerprint,
}

/// Measurements taken after mastering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteringReport {
    pub peak_db: f64,
    pub rms_db: f64,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    /// Largest gain reduction applied by compressor and limiter combined
    pub max_gain_reduction_db: f64,
    pub vocal_gain_db: f64,
    pub beat_gain_db: f64,
}

/// Mastering stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteredTrack {
    pub track: FinalTrack,
    pub report: MasteringReport,
}
