//! Speech synthesis
//!
//! [`CommandSpeech`] drives an external TTS program (espeak-ng by default)
//! that writes a WAV file; [`SpeechSynthesizer`] speaks lyric lines one at a
//! time through any [`TextToAudio`] and lays them out in one raw buffer.

use super::error::StageError;
use super::{TextToAudio, VocalSynthesizer};
use crate::audio::resampler::resample_interleaved;
use crate::audio::wav::read_wav;
use crate::config::TtsConfig;
use crate::models::{LineSpan, LyricLine, MonoAudio, SynthesizedVocals};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// External TTS program writing a WAV file per utterance
pub struct CommandSpeech {
    config: TtsConfig,
    sample_rate: u32,
}

impl CommandSpeech {
    pub fn new(config: TtsConfig, sample_rate: u32) -> Self {
        Self { config, sample_rate }
    }

    /// Program arguments with every placeholder filled in
    fn arguments(&self, text: &str, output: &str) -> Vec<String> {
        // A leading dash would be parsed as an option
        let text = text.trim_start_matches('-').trim();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", &self.config.voice)
                    .replace("{rate}", &self.config.rate.to_string())
                    .replace("{output}", output)
                    .replace("{text}", text)
            })
            .collect()
    }
}

#[async_trait]
impl TextToAudio for CommandSpeech {
    async fn speak(&self, text: &str) -> Result<MonoAudio, StageError> {
        let output: PathBuf = std::env::temp_dir().join(format!("dissforge-tts-{}.wav", Uuid::new_v4()));
        let args = self.arguments(text, &output.to_string_lossy());

        let result = Command::new(&self.config.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await;

        let outcome = match result {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StageError::Internal(format!(
                "TTS program '{}' not found",
                self.config.program
            ))),
            Err(e) => Err(StageError::Internal(format!("failed to start TTS program: {}", e))),
            Ok(out) if !out.status.success() => Err(StageError::Unavailable(format!(
                "TTS program exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
            Ok(_) => {
                let path = output.clone();
                let target_rate = self.sample_rate;
                tokio::task::spawn_blocking(move || -> anyhow::Result<MonoAudio> {
                    let (samples, channels, rate) = read_wav(&path)?;
                    let mono: Vec<f32> = samples
                        .chunks_exact(channels.max(1))
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                        .collect();
                    let resampled = resample_interleaved(mono, 1, rate, target_rate)?;
                    Ok(MonoAudio::new(resampled, target_rate))
                })
                .await
                .map_err(|e| StageError::Internal(format!("TTS decode task failed: {}", e)))?
                .map_err(|e| StageError::Unavailable(format!("unreadable TTS output: {:#}", e)))
            }
        };

        if let Err(e) = tokio::fs::remove_file(&output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %output.display(), error = %e, "Failed to remove TTS temp file");
            }
        }
        outcome
    }
}

/// Line-by-line synthesizer over a [`TextToAudio`] capability
pub struct SpeechSynthesizer {
    speech: Arc<dyn TextToAudio>,
    line_pause_ms: u64,
    sample_rate: u32,
}

impl SpeechSynthesizer {
    pub fn new(speech: Arc<dyn TextToAudio>, line_pause_ms: u64, sample_rate: u32) -> Self {
        Self {
            speech,
            line_pause_ms,
            sample_rate,
        }
    }
}

#[async_trait]
impl VocalSynthesizer for SpeechSynthesizer {
    async fn synthesize(&self, lines: &[LyricLine]) -> Result<SynthesizedVocals, StageError> {
        if lines.is_empty() {
            return Err(StageError::InvalidInput("no lyric lines to synthesize".to_string()));
        }

        let pause = (self.line_pause_ms as f64 / 1000.0 * self.sample_rate as f64).round() as usize;
        let mut samples: Vec<f32> = Vec::new();
        let mut spans = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            let audio = self.speech.speak(&line.text).await?;
            if audio.sample_rate != self.sample_rate {
                return Err(StageError::Internal(format!(
                    "speech returned {} Hz audio, pipeline runs at {} Hz",
                    audio.sample_rate, self.sample_rate
                )));
            }

            if index > 0 {
                samples.resize(samples.len() + pause, 0.0);
            }
            let start = samples.len();
            samples.extend_from_slice(&audio.samples);
            spans.push(LineSpan::new(start, samples.len()));
            debug!(line = index, seconds = audio.duration_seconds(), "Line synthesized");
        }

        Ok(SynthesizedVocals {
            audio: MonoAudio::new(samples, self.sample_rate),
            lines: spans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Speaks 100 samples per character
    struct FixedSpeech;

    #[async_trait]
    impl TextToAudio for FixedSpeech {
        async fn speak(&self, text: &str) -> Result<MonoAudio, StageError> {
            Ok(MonoAudio::new(vec![0.5; text.len() * 100], 8_000))
        }
    }

    #[tokio::test]
    async fn test_spans_skip_pauses() {
        let synth = SpeechSynthesizer::new(Arc::new(FixedSpeech), 100, 8_000);
        let vocals = synth
            .synthesize(&[LyricLine::new("ab"), LyricLine::new("cde")])
            .await
            .unwrap();
        assert_eq!(vocals.lines, vec![LineSpan::new(0, 200), LineSpan::new(1_000, 1_300)]);
        assert_eq!(vocals.audio.samples.len(), 1_300);
        assert_eq!(vocals.natural_duration(1), Some(300.0 / 8_000.0));
    }

    #[tokio::test]
    async fn test_rate_mismatch_is_rejected() {
        let synth = SpeechSynthesizer::new(Arc::new(FixedSpeech), 0, 44_100);
        let err = synth.synthesize(&[LyricLine::new("x")]).await.unwrap_err();
        assert_eq!(err.code(), "Internal");
    }

    #[tokio::test]
    async fn test_missing_program_is_permanent() {
        let config = TtsConfig {
            program: "dissforge-no-such-tts-binary".to_string(),
            ..TtsConfig::default()
        };
        let err = CommandSpeech::new(config, 22_050).speak("hello").await.unwrap_err();
        assert!(!err.is_transient(), "{:?}", err);
    }

    #[test]
    fn test_arguments_fill_placeholders() {
        let speech = CommandSpeech::new(TtsConfig::default(), 22_050);
        let args = speech.arguments("--yo", "/tmp/out.wav");
        assert_eq!(args, vec!["-v", "en-us", "-s", "220", "-w", "/tmp/out.wav", "yo"]);
    }
}
