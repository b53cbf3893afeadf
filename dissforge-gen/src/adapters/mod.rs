//! Stage adapters
//!
//! Each external collaborator sits behind a narrow async trait with a
//! uniform `(input) -> Result<output, StageError>` contract. LLM and TTS
//! providers are further abstracted as the [`TextTransform`] and
//! [`TextToAudio`] capabilities, so a provider swap only touches
//! [`Adapters::from_config`].
//!
//! Adapters return errors verbatim; retry decisions belong to the
//! orchestrator.

pub mod beats;
pub mod error;
pub mod lyrics;
pub mod ollama;
pub mod reddit;
pub mod sanitizer;
pub mod speech;
pub mod themes;

pub use error::{ErrorClass, ScrapeError, StageError};
pub use sanitizer::{clean_text, AnalysisCorpus};

use crate::config::GeneratorConfig;
use crate::models::{BeatAudio, GenerationOptions, LyricLine, MonoAudio, ScrapedPost, SynthesizedVocals, ThemeReport};
use async_trait::async_trait;
use dissforge_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Fetches a Reddit post and its best comments
#[async_trait]
pub trait PostScraper: Send + Sync {
    async fn scrape(&self, post_url: &str) -> std::result::Result<ScrapedPost, StageError>;
}

/// Extracts themes, sentiment and key phrases from cleaned post text
#[async_trait]
pub trait ThemeAnalyzer: Send + Sync {
    async fn analyze_text(&self, corpus: &AnalysisCorpus) -> std::result::Result<ThemeReport, StageError>;
}

/// Writes lyric lines (no timing) from a theme report
#[async_trait]
pub trait LyricGenerator: Send + Sync {
    async fn generate(
        &self,
        report: &ThemeReport,
        options: &GenerationOptions,
    ) -> std::result::Result<Vec<LyricLine>, StageError>;
}

/// Reworks lyric lines, keeping count and order, and attaches timing hints
#[async_trait]
pub trait LyricRefiner: Send + Sync {
    async fn refine(
        &self,
        lines: &[LyricLine],
        options: &GenerationOptions,
    ) -> std::result::Result<Vec<LyricLine>, StageError>;
}

/// Speaks the lines into one raw buffer with per-line spans
#[async_trait]
pub trait VocalSynthesizer: Send + Sync {
    async fn synthesize(&self, lines: &[LyricLine]) -> std::result::Result<SynthesizedVocals, StageError>;
}

/// Resolves a beat id into decoded stereo audio at the pipeline rate
#[async_trait]
pub trait BeatSource: Send + Sync {
    async fn load(&self, beat_id: &str) -> std::result::Result<BeatAudio, StageError>;
}

/// One text-to-text model call
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Black-box language model
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn transform(&self, request: TransformRequest) -> std::result::Result<String, StageError>;
}

/// Black-box speech synthesizer
#[async_trait]
pub trait TextToAudio: Send + Sync {
    async fn speak(&self, text: &str) -> std::result::Result<MonoAudio, StageError>;
}

/// Every adapter the orchestrator drives
#[derive(Clone)]
pub struct Adapters {
    pub scraper: Arc<dyn PostScraper>,
    pub analyzer: Arc<dyn ThemeAnalyzer>,
    pub generator: Arc<dyn LyricGenerator>,
    pub refiner: Arc<dyn LyricRefiner>,
    pub synthesizer: Arc<dyn VocalSynthesizer>,
    pub beats: Arc<dyn BeatSource>,
}

impl Adapters {
    /// Production wiring: Reddit JSON API, Ollama, an external TTS program and the beat library
    pub fn from_config(config: &GeneratorConfig, beats_dir: PathBuf) -> Result<Self> {
        let llm: Arc<dyn TextTransform> = Arc::new(
            ollama::OllamaClient::new(&config.ollama)
                .map_err(|e| Error::Config(format!("Ollama client: {}", e)))?,
        );
        let speech: Arc<dyn TextToAudio> =
            Arc::new(speech::CommandSpeech::new(config.tts.clone(), config.sample_rate));

        Ok(Self {
            scraper: Arc::new(
                reddit::RedditClient::new(&config.reddit)
                    .map_err(|e| Error::Config(format!("Reddit client: {}", e)))?,
            ),
            analyzer: Arc::new(themes::LlmThemeAnalyzer::new(llm.clone(), &config.ollama)),
            generator: Arc::new(lyrics::LlmLyricGenerator::new(llm.clone(), &config.ollama)),
            refiner: Arc::new(lyrics::LlmLyricRefiner::new(llm, &config.ollama)),
            synthesizer: Arc::new(speech::SpeechSynthesizer::new(
                speech,
                config.tts.line_pause_ms,
                config.sample_rate,
            )),
            beats: Arc::new(
                beats::BeatLibrary::new(beats_dir, config.sample_rate, config.beats.download_timeout_secs)
                    .map_err(|e| Error::Config(format!("beat library: {}", e)))?,
            ),
        })
    }
}
