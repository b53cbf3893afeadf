//! Generator configuration
//!
//! One immutable [`GeneratorConfig`] is built at startup from the
//! `[generator]` TOML section (serde defaults fill gaps), then environment
//! overrides for endpoints and credentials are applied once. It is shared as
//! `Arc<GeneratorConfig>`; nothing reads ambient configuration afterwards.

use crate::audio::aligner::AlignerConfig;
use crate::audio::mastering::MasteringConfig;
use crate::audio::onset::AnalyzerConfig;
use crate::pipeline::StageKind;
use dissforge_common::config::TomlConfig;
use dissforge_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const ENV_OLLAMA_URL: &str = "DISSFORGE_OLLAMA_URL";
pub const ENV_OLLAMA_MODEL: &str = "DISSFORGE_OLLAMA_MODEL";
pub const ENV_REDDIT_TOKEN: &str = "DISSFORGE_REDDIT_TOKEN";
pub const ENV_REDDIT_USER_AGENT: &str = "DISSFORGE_REDDIT_USER_AGENT";

/// Complete generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub server: ServerConfig,
    pub reddit: RedditConfig,
    pub ollama: OllamaConfig,
    pub tts: TtsConfig,
    pub beats: BeatConfig,
    pub stages: StagePolicies,
    pub analyzer: AnalyzerConfig,
    pub aligner: AlignerConfig,
    pub mastering: MasteringConfig,
    pub store: StoreConfig,
    /// Working sample rate for every audio stage
    pub sample_rate: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            reddit: RedditConfig::default(),
            ollama: OllamaConfig::default(),
            tts: TtsConfig::default(),
            beats: BeatConfig::default(),
            stages: StagePolicies::default(),
            analyzer: AnalyzerConfig::default(),
            aligner: AlignerConfig::default(),
            mastering: MasteringConfig::default(),
            store: StoreConfig::default(),
            sample_rate: 44_100,
        }
    }
}

impl GeneratorConfig {
    /// Build from the `[generator]` section of a loaded TOML file, then apply env overrides
    pub fn from_toml(toml: &TomlConfig) -> Result<Self> {
        let mut config: GeneratorConfig = toml.section("generator")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Endpoint and credential overrides from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env(ENV_OLLAMA_URL) {
            info!("Ollama endpoint loaded from environment variable");
            self.ollama.endpoint = url;
        }
        if let Some(model) = non_empty_env(ENV_OLLAMA_MODEL) {
            self.ollama.model = model;
        }
        if let Some(token) = non_empty_env(ENV_REDDIT_TOKEN) {
            info!("Reddit token loaded from environment variable");
            self.reddit.bearer_token = Some(token);
        }
        if let Some(agent) = non_empty_env(ENV_REDDIT_USER_AGENT) {
            self.reddit.user_agent = agent;
        }
    }

    /// Reject inconsistent numbers before anything runs
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8_000 || self.sample_rate > 192_000 {
            return Err(Error::Config(format!(
                "sample_rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        for kind in StageKind::ALL {
            self.stages
                .policy(kind)
                .validate()
                .map_err(|msg| Error::Config(format!("stages.{}: {}", kind.config_key(), msg)))?;
        }
        self.analyzer.validate().map_err(Error::Config)?;
        self.aligner.validate().map_err(Error::Config)?;
        self.mastering.validate().map_err(Error::Config)?;
        if self.store.capacity == 0 {
            return Err(Error::Config("store.capacity must be at least 1".to_string()));
        }
        if self.reddit.max_comments == 0 {
            return Err(Error::Config("reddit.max_comments must be at least 1".to_string()));
        }
        if !self.tts.args.iter().any(|a| a.contains("{output}")) {
            return Err(Error::Config(
                "tts.args must contain an {output} placeholder".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Finished runs kept for status and track download
    pub max_finished_runs: usize,
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5740".to_string(),
            max_finished_runs: 128,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub base_url: String,
    pub user_agent: String,
    /// OAuth bearer token; anonymous access when absent
    #[serde(skip_serializing)]
    pub bearer_token: Option<String>,
    pub max_comments: usize,
    /// Minimum spacing between requests
    pub min_request_interval_ms: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            user_agent: format!("dissforge/{} (diss track generator)", env!("CARGO_PKG_VERSION")),
            bearer_token: None,
            max_comments: 10,
            min_request_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub analysis_temperature: f32,
    pub analysis_max_tokens: u32,
    pub generate_temperature: f32,
    pub generate_max_tokens: u32,
    pub refine_temperature: f32,
    pub refine_max_tokens: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.3:latest".to_string(),
            analysis_temperature: 0.2,
            analysis_max_tokens: 400,
            generate_temperature: 0.8,
            generate_max_tokens: 1000,
            refine_temperature: 0.7,
            refine_max_tokens: 500,
        }
    }
}

/// External TTS program invocation
///
/// `args` may contain `{text}`, `{voice}`, `{rate}` and `{output}`; the
/// output placeholder is replaced by a temporary WAV path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub program: String,
    pub args: Vec<String>,
    pub voice: String,
    /// Words per minute
    pub rate: u32,
    /// Silence inserted between lines in the raw vocal buffer
    pub line_pause_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            args: vec![
                "-v".to_string(),
                "{voice}".to_string(),
                "-s".to_string(),
                "{rate}".to_string(),
                "-w".to_string(),
                "{output}".to_string(),
                "{text}".to_string(),
            ],
            voice: "en-us".to_string(),
            rate: 220,
            line_pause_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Used when a request names no beat
    pub default_beat: Option<String>,
    /// Timeout for fetching a beat given as a URL
    pub download_timeout_secs: u64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            default_beat: None,
            download_timeout_secs: 20,
        }
    }
}

/// Retry and timeout policy for one stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagePolicy {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_attempts: 3,
            initial_backoff_ms: 250,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4_000,
        }
    }
}

impl StagePolicy {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before attempt `attempt + 1`, given `attempt` failures so far (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((ms as u64).min(self.max_backoff_ms))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }
}

/// Per-stage policies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePolicies {
    pub scrape: StagePolicy,
    pub analyze: StagePolicy,
    pub generate: StagePolicy,
    pub refine: StagePolicy,
    pub synthesize: StagePolicy,
    pub beat_load: StagePolicy,
    pub beat_grid: StagePolicy,
    pub align: StagePolicy,
    pub master: StagePolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            scrape: StagePolicy::with_timeout_ms(15_000),
            analyze: StagePolicy::with_timeout_ms(60_000),
            generate: StagePolicy::with_timeout_ms(120_000),
            refine: StagePolicy::with_timeout_ms(90_000),
            synthesize: StagePolicy::with_timeout_ms(120_000),
            beat_load: StagePolicy::with_timeout_ms(30_000),
            beat_grid: StagePolicy::with_timeout_ms(30_000),
            align: StagePolicy::with_timeout_ms(30_000),
            master: StagePolicy::with_timeout_ms(30_000),
        }
    }
}

impl StagePolicies {
    pub fn policy(&self, kind: StageKind) -> &StagePolicy {
        match kind {
            StageKind::Scrape => &self.scrape,
            StageKind::Analyze => &self.analyze,
            StageKind::Generate => &self.generate,
            StageKind::Refine => &self.refine,
            StageKind::Synthesize => &self.synthesize,
            StageKind::BeatLoad => &self.beat_load,
            StageKind::BeatGrid => &self.beat_grid,
            StageKind::Align => &self.align,
            StageKind::Master => &self.master,
        }
    }

    /// Same policy for every stage (used by tests and tooling)
    pub fn uniform(policy: StagePolicy) -> Self {
        Self {
            scrape: policy.clone(),
            analyze: policy.clone(),
            generate: policy.clone(),
            refine: policy.clone(),
            synthesize: policy.clone(),
            beat_load: policy.clone(),
            beat_grid: policy.clone(),
            align: policy.clone(),
            master: policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum artifacts held in memory
    pub capacity: usize,
    /// Artifacts older than this are evictable and pruned from the database
    pub max_age_hours: u64,
    /// Total time spent retrying a locked database write
    pub max_lock_wait_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_age_hours: 24,
            max_lock_wait_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = GeneratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stages.scrape.max_attempts, 3);
        assert_eq!(config.aligner.min_stretch, 0.75);
        assert_eq!(config.aligner.max_stretch, 1.35);
        assert_eq!(config.mastering.vocal_gain, 0.8);
        assert_eq!(config.mastering.beat_gain, 0.6);
    }

    #[test]
    #[serial]
    fn test_partial_toml_section() {
        std::env::remove_var(ENV_OLLAMA_URL);
        let toml = TomlConfig::from_toml_str(
            r#"
            [generator]
            sample_rate = 48000

            [generator.stages.scrape]
            max_attempts = 5

            [generator.aligner]
            subdivision = "half_beat"
            "#,
        )
        .unwrap();
        let config = GeneratorConfig::from_toml(&toml).unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.stages.scrape.max_attempts, 5);
        // Untouched fields of a partially given policy keep their defaults
        assert_eq!(config.stages.scrape.initial_backoff_ms, 250);
        assert_eq!(config.stages.generate.timeout_ms, 120_000);
        assert_eq!(
            config.aligner.subdivision,
            crate::models::Subdivision::HalfBeat
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_OLLAMA_URL, "http://gpu-box:11434");
        std::env::set_var(ENV_REDDIT_TOKEN, "secret");
        let config = GeneratorConfig::from_toml(&TomlConfig::default()).unwrap();
        std::env::remove_var(ENV_OLLAMA_URL);
        std::env::remove_var(ENV_REDDIT_TOKEN);

        assert_eq!(config.ollama.endpoint, "http://gpu-box:11434");
        assert_eq!(config.reddit.bearer_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = GeneratorConfig::default();
        config.stages.refine.max_attempts = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("stages.refine"), "{}", err);
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let policy = StagePolicy {
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 300,
            ..StagePolicy::default()
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_after(10), Duration::from_millis(300));
    }
}
