//! Pipeline requests
//!
//! A [`PipelineRequest`] is immutable once built. Its identity is the hash of
//! the normalized source URL, the beat id and [`PIPELINE_VERSION`].

use chrono::{DateTime, Utc};
use dissforge_common::Fingerprint;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bumped whenever stage semantics change, invalidating every cached artifact
pub const PIPELINE_VERSION: &str = "dissforge-pipeline/1";

/// Flow complexity bounds (inclusive)
pub const MIN_FLOW_COMPLEXITY: u8 = 1;
pub const MAX_FLOW_COMPLEXITY: u8 = 10;

/// Request construction errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    #[error("invalid Reddit URL: {0}")]
    InvalidUrl(String),

    #[error("no beat selected and no default beat configured")]
    MissingBeat,

    #[error("invalid beat id: {0}")]
    InvalidBeat(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// Delivery style requested for the lyrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricStyle {
    Aggressive,
    Playful,
    Sarcastic,
    Custom(String),
}

impl Default for LyricStyle {
    fn default() -> Self {
        LyricStyle::Aggressive
    }
}

impl LyricStyle {
    /// Case-insensitive parse; unknown names become `Custom`
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "aggressive" => LyricStyle::Aggressive,
            "playful" => LyricStyle::Playful,
            "sarcastic" => LyricStyle::Sarcastic,
            _ => LyricStyle::Custom(trimmed.to_string()),
        }
    }

    /// Lowercase word used inside prompts
    pub fn prompt_word(&self) -> String {
        match self {
            LyricStyle::Aggressive => "aggressive".to_string(),
            LyricStyle::Playful => "playful".to_string(),
            LyricStyle::Sarcastic => "sarcastic".to_string(),
            LyricStyle::Custom(s) => s.to_lowercase(),
        }
    }
}

/// Options shaping the text stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub style: LyricStyle,

    /// 1 (plain) ..= 10 (dense internal rhyme, fast delivery)
    #[serde(default = "default_flow_complexity")]
    pub flow_complexity: u8,
}

fn default_flow_complexity() -> u8 {
    5
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            style: LyricStyle::default(),
            flow_complexity: default_flow_complexity(),
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), RequestError> {
        if !(MIN_FLOW_COMPLEXITY..=MAX_FLOW_COMPLEXITY).contains(&self.flow_complexity) {
            return Err(RequestError::InvalidOption(format!(
                "flow_complexity must be between {} and {}, got {}",
                MIN_FLOW_COMPLEXITY, MAX_FLOW_COMPLEXITY, self.flow_complexity
            )));
        }
        if let LyricStyle::Custom(s) = &self.style {
            if s.chars().count() > 40 {
                return Err(RequestError::InvalidOption(
                    "style must be at most 40 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    source_url: String,
    beat_id: String,
    options: GenerationOptions,
    created_at: DateTime<Utc>,
}

impl PipelineRequest {
    /// Validate and normalize a request
    pub fn new(
        source_url: &str,
        beat_id: Option<&str>,
        options: GenerationOptions,
    ) -> Result<Self, RequestError> {
        let source_url = normalize_reddit_url(source_url)?;
        let beat_id = match beat_id.map(str::trim) {
            Some(id) if !id.is_empty() => validate_beat_id(id)?,
            _ => return Err(RequestError::MissingBeat),
        };
        options.validate()?;

        Ok(Self {
            source_url,
            beat_id,
            options,
            created_at: Utc::now(),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn beat_id(&self) -> &str {
        &self.beat_id
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Request identity: hash(source_url, beat_id, pipeline_version)
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::builder()
            .field("request")
            .field(&self.source_url)
            .field(&self.beat_id)
            .field(PIPELINE_VERSION)
            .finish()
    }
}

/// Normalize a Reddit post URL to `https://www.reddit.com/<path>`
///
/// Query strings, fragments and trailing slashes are dropped so that shared
/// links with tracking parameters map to the same request identity.
pub fn normalize_reddit_url(raw: &str) -> Result<String, RequestError> {
    let url = Url::parse(raw.trim()).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(RequestError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| RequestError::InvalidUrl("missing host".to_string()))?
        .to_lowercase();
    let path = url.path().trim_end_matches('/');

    if host == "redd.it" {
        let id = path.trim_start_matches('/');
        if id.is_empty() || id.contains('/') {
            return Err(RequestError::InvalidUrl("short link without post id".to_string()));
        }
        return Ok(format!("https://www.reddit.com/comments/{}", id));
    }

    if host != "reddit.com" && !host.ends_with(".reddit.com") {
        return Err(RequestError::InvalidUrl(format!("'{}' is not a Reddit host", host)));
    }
    if !path.contains("/comments/") {
        return Err(RequestError::InvalidUrl("URL does not point at a post".to_string()));
    }

    Ok(format!("https://www.reddit.com{}", path))
}

/// Beat ids are library file names or http(s) URLs
fn validate_beat_id(id: &str) -> Result<String, RequestError> {
    if id.starts_with("http://") || id.starts_with("https://") {
        Url::parse(id).map_err(|e| RequestError::InvalidBeat(e.to_string()))?;
        return Ok(id.to_string());
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") || id.starts_with('.') {
        return Err(RequestError::InvalidBeat(format!(
            "'{}' must be a file name in the beat library",
            id
        )));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &str = "https://www.reddit.com/r/rust/comments/abc123/some_title/";

    #[test]
    fn test_url_normalization_drops_tracking() {
        let a = normalize_reddit_url(POST).unwrap();
        let b = normalize_reddit_url(
            "https://old.reddit.com/r/rust/comments/abc123/some_title/?utm_source=share#top",
        )
        .unwrap();
        assert_eq!(a, "https://www.reddit.com/r/rust/comments/abc123/some_title");
        assert_eq!(a, b);
    }

    #[test]
    fn test_short_link_expands() {
        assert_eq!(
            normalize_reddit_url("https://redd.it/abc123").unwrap(),
            "https://www.reddit.com/comments/abc123"
        );
    }

    #[test]
    fn test_rejects_non_reddit_and_non_posts() {
        assert!(normalize_reddit_url("https://example.com/r/x/comments/1").is_err());
        assert!(normalize_reddit_url("https://www.reddit.com/r/rust/").is_err());
        assert!(normalize_reddit_url("ftp://reddit.com/r/x/comments/1").is_err());
        assert!(normalize_reddit_url("not a url").is_err());
    }

    #[test]
    fn test_identity_ignores_options_and_time() {
        let a = PipelineRequest::new(POST, Some("boom_bap.wav"), GenerationOptions::default())
            .unwrap();
        let b = PipelineRequest::new(
            POST,
            Some("boom_bap.wav"),
            GenerationOptions {
                style: LyricStyle::Playful,
                flow_complexity: 9,
            },
        )
        .unwrap();
        let c = PipelineRequest::new(POST, Some("trap.wav"), GenerationOptions::default()).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_beat_validation() {
        let options = GenerationOptions::default();
        assert_eq!(
            PipelineRequest::new(POST, None, options.clone()).unwrap_err(),
            RequestError::MissingBeat
        );
        assert!(matches!(
            PipelineRequest::new(POST, Some("../etc/passwd"), options.clone()),
            Err(RequestError::InvalidBeat(_))
        ));
        assert!(PipelineRequest::new(POST, Some("https://beats.example/loop.mp3"), options).is_ok());
    }

    #[test]
    fn test_flow_complexity_bounds() {
        let options = GenerationOptions {
            style: LyricStyle::Aggressive,
            flow_complexity: 11,
        };
        assert!(matches!(
            PipelineRequest::new(POST, Some("a.wav"), options),
            Err(RequestError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_style_parse() {
        assert_eq!(LyricStyle::parse("Sarcastic"), LyricStyle::Sarcastic);
        assert_eq!(LyricStyle::parse(" "), LyricStyle::Aggressive);
        assert_eq!(
            LyricStyle::parse("Old School"),
            LyricStyle::Custom("Old School".to_string())
        );
        assert_eq!(LyricStyle::parse("Old School").prompt_word(), "old school");
    }
}
