//! Sample-rate conversion with rubato

use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Resample interleaved audio with `channels` channels from `from` Hz to `to` Hz
///
/// Same-rate input is returned untouched.
pub fn resample_interleaved(samples: Vec<f32>, channels: usize, from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples);
    }
    let channels = channels.max(1);
    let frames = samples.len() / channels;
    if frames == 0 {
        return Ok(Vec::new());
    }

    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to as f64 / from as f64;

    // Whole input as a single chunk
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, channels)
        .context("Failed to create resampler")?;
    let output = resampler
        .process(&planar, None)
        .context("Resampling failed")?;

    let out_frames = output[0].len();
    let mut interleaved = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        for channel in &output {
            interleaved.push(channel[i]);
        }
    }

    debug!(frames, from, out_frames, to, "Resampled");
    Ok(interleaved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_passthrough() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_interleaved(input.clone(), 1, 44_100, 44_100).unwrap(), input);
    }

    #[test]
    fn test_upsample_length() {
        let input: Vec<f32> = (0..22_050 * 2).map(|i| ((i / 2) as f32 * 0.01).sin()).collect();
        let out = resample_interleaved(input, 2, 22_050, 44_100).unwrap();
        let frames = out.len() / 2;
        assert_eq!(out.len() % 2, 0);
        assert!((frames as i64 - 44_100).abs() < 64, "{} frames", frames);
    }
}
