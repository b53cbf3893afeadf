//! WAV reading and 16-bit encoding with hound

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

/// Read a WAV file as interleaved f32: (samples, channels, sample_rate)
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("Corrupt float WAV data")?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .context("Corrupt integer WAV data")?
        }
    };

    Ok((samples, spec.channels as usize, spec.sample_rate))
}

/// Encode interleaved f32 samples as a 16-bit PCM WAV file in memory
pub fn encode_wav_16(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(samples.len() * 2 + 44));
    {
        let mut writer = WavWriter::new(&mut cursor, spec).context("Failed to start WAV stream")?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer.write_sample(value).context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV stream")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_header() {
        let bytes = encode_wav_16(&[0.0, 1.0, -1.0, 0.5], 2, 44_100).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 8);
    }

    #[test]
    fn test_read_back_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let bytes = encode_wav_16(&[0.25; 100], 1, 16_000).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let (samples, channels, rate) = read_wav(&path).unwrap();
        assert_eq!((channels, rate, samples.len()), (1, 16_000, 100));
        assert!((samples[0] - 0.25).abs() < 1e-3);
    }
}
