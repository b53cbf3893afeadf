//! Synthetic audio for pipeline tests

use dissforge_gen::models::{BeatAudio, LineSpan, MonoAudio, SynthesizedVocals};
use std::f32::consts::PI;
use std::path::Path;

/// Working sample rate of the test pipeline
pub const TEST_SAMPLE_RATE: u32 = 22_050;

/// Decaying 1 kHz clicks every `period` seconds, starting at `first`
pub fn click_track(first: f64, period: f64, duration: f64) -> Vec<f32> {
    let sr = TEST_SAMPLE_RATE as f64;
    let mut samples = vec![0.0f32; (duration * sr) as usize];
    let burst = (0.03 * sr) as usize;
    let mut t = first;
    while t < duration {
        let start = (t * sr) as usize;
        for i in 0..burst {
            if let Some(s) = samples.get_mut(start + i) {
                let env = (-(i as f32) / (burst as f32 / 5.0)).exp();
                *s += 0.8 * env * (2.0 * PI * 1000.0 * i as f32 / TEST_SAMPLE_RATE as f32).sin();
            }
        }
        t += period;
    }
    samples
}

/// Stereo beat at 120 BPM, 9 seconds long
pub fn beat_120_bpm() -> BeatAudio {
    BeatAudio::from_interleaved(&click_track(0.5, 0.5, 9.0), 1, TEST_SAMPLE_RATE)
}

/// Stereo beat with no detectable onsets
pub fn near_silent_beat(seconds: f64) -> BeatAudio {
    let n = (seconds * TEST_SAMPLE_RATE as f64) as usize;
    let samples: Vec<f32> = (0..n)
        .map(|i| 1e-5 * ((i * 7919 % 1000) as f32 / 500.0 - 1.0))
        .collect();
    BeatAudio::from_interleaved(&samples, 1, TEST_SAMPLE_RATE)
}

/// Concatenated 220 Hz tones, one per line, with their spans
pub fn spoken_lines(durations: &[f64]) -> SynthesizedVocals {
    let mut samples = Vec::new();
    let mut lines = Vec::with_capacity(durations.len());
    for seconds in durations {
        let start = samples.len();
        let n = (seconds * TEST_SAMPLE_RATE as f64).round() as usize;
        samples.extend((0..n).map(|i| 0.3 * (2.0 * PI * 220.0 * i as f32 / TEST_SAMPLE_RATE as f32).sin()));
        lines.push(LineSpan::new(start, samples.len()));
    }
    SynthesizedVocals {
        audio: MonoAudio::new(samples, TEST_SAMPLE_RATE),
        lines,
    }
}

/// Write mono f32 samples as a 16-bit WAV file
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create WAV");
    for s in samples {
        writer
            .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .expect("write sample");
    }
    writer.finalize().expect("finalize WAV");
}
