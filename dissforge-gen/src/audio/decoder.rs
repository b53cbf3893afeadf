//! Audio decoding
//!
//! symphonia probes the container and decodes every packet of the default
//! track into interleaved f32 PCM. Channel layout is kept; callers decide how
//! to fold it.

use anyhow::{Context, Result};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decoded PCM
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels) as f64 / self.sample_rate as f64
    }
}

/// Decode a file on disk
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    debug!(path = %path.display(), "Decoding audio file");
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let extension = path.extension().and_then(|e| e.to_str());
    decode_source(Box::new(file), extension)
        .with_context(|| format!("Failed to decode {}", path.display()))
}

/// Decode an in-memory file (e.g. a downloaded beat)
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
    decode_source(Box::new(Cursor::new(bytes)), extension)
}

fn decode_source(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognized audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.context("Sample rate unknown")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow::anyhow!("Error reading packet: {}", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // Corrupt frame: skip it, keep the rest of the stream
                warn!(error = msg, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(anyhow::anyhow!("Decode failed: {}", e)),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 {
        anyhow::bail!("Channel layout unknown");
    }

    let audio = DecodedAudio {
        samples,
        sample_rate,
        channels,
    };
    debug!(
        sample_rate,
        channels,
        duration_seconds = format!("{:.2}", audio.duration_seconds()),
        "Audio decoding complete"
    );
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::encode_wav_16;

    #[test]
    fn test_decodes_wav_bytes() {
        let samples: Vec<f32> = (0..800).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let bytes = encode_wav_16(&samples, 2, 8_000).unwrap();
        let decoded = decode_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.samples.len(), 800);
        assert!((decoded.samples[0] - 0.5).abs() < 1e-3);
        assert!((decoded.duration_seconds() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decode_bytes(vec![0u8; 64], None).is_err());
    }
}
