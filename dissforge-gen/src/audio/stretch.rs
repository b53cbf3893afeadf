//! Pitch-preserving time stretch (WSOLA)
//!
//! Overlap-add of Hann-windowed analysis frames, each taken from near its
//! nominal input position at the offset that best continues the previous
//! frame's waveform. Pitch is untouched; only duration changes.

/// Analysis frame length in seconds
const FRAME_SECONDS: f64 = 0.04;

/// Stretch `input` so the output is `round(len × ratio)` samples long
///
/// `ratio` > 1 slows down, < 1 speeds up. A ratio of exactly 1 returns the
/// input unchanged. Inputs shorter than two analysis frames fall back to
/// linear interpolation.
pub fn time_stretch(input: &[f32], sample_rate: u32, ratio: f64) -> Vec<f32> {
    let target_len = (input.len() as f64 * ratio).round().max(0.0) as usize;
    if target_len == 0 || input.is_empty() {
        return vec![0.0; target_len];
    }
    if target_len == input.len() {
        return input.to_vec();
    }

    let frame = ((FRAME_SECONDS * sample_rate as f64).round() as usize).max(16) & !1;
    if input.len() < frame * 2 {
        return interpolate(input, target_len);
    }

    let hop_out = frame / 2;
    let hop_in = hop_out as f64 * input.len() as f64 / target_len as f64;
    let tolerance = (frame / 16).max(1) as i64;
    let max_start = (input.len() - frame) as i64;

    let window: Vec<f32> = (0..frame)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * (i as f32 + 0.5) / frame as f32).cos())
        })
        .collect();

    let mut output = vec![0.0f32; target_len + frame];
    let mut norm = vec![0.0f32; target_len + frame];

    let mut previous: i64 = 0;
    let mut out_pos = 0usize;
    let mut k = 0usize;
    while out_pos < target_len {
        let nominal = ((k as f64 * hop_in).round() as i64).min(max_start);
        let chosen = if k == 0 {
            0
        } else {
            let continuation = (previous + hop_out as i64).min(max_start);
            best_offset(input, nominal, continuation, tolerance, hop_out, max_start)
        };

        for (i, w) in window.iter().enumerate() {
            let sample = input.get(chosen as usize + i).copied().unwrap_or(0.0);
            output[out_pos + i] += sample * w;
            norm[out_pos + i] += w;
        }

        previous = chosen;
        out_pos += hop_out;
        k += 1;
    }

    output.truncate(target_len);
    for (sample, weight) in output.iter_mut().zip(&norm) {
        if *weight > 1e-3 {
            *sample /= weight;
        }
    }
    output
}

/// Offset within ±tolerance of `nominal` whose opening best matches the
/// natural continuation of the previous frame
fn best_offset(
    input: &[f32],
    nominal: i64,
    continuation: i64,
    tolerance: i64,
    overlap: usize,
    max_start: i64,
) -> i64 {
    const STRIDE: usize = 4;
    let reference = &input[continuation as usize..];

    let mut best = nominal.clamp(0, max_start);
    let mut best_score = f32::MIN;
    for delta in -tolerance..=tolerance {
        let candidate = (nominal + delta).clamp(0, max_start);
        let segment = &input[candidate as usize..];
        let score: f32 = (0..overlap.min(segment.len()).min(reference.len()))
            .step_by(STRIDE)
            .map(|i| segment[i] * reference[i])
            .sum();
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }
    best
}

/// Linear resample of a short segment to exactly `target_len` samples
fn interpolate(input: &[f32], target_len: usize) -> Vec<f32> {
    if target_len == 1 || input.len() == 1 {
        return vec![input[0]; target_len];
    }
    let scale = (input.len() - 1) as f64 / (target_len - 1) as f64;
    (0..target_len)
        .map(|i| {
            let pos = i as f64 * scale;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx];
            let b = input.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}
