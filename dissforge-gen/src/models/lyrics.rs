//! Text-side data: scraped posts, theme reports and lyric lines

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Post content as returned by the scraper adapter
///
/// `top_comments` holds comment bodies with positive score, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPost {
    pub title: String,
    pub body: String,
    pub author: String,
    pub subreddit: String,
    pub score: i64,
    pub top_comments: Vec<String>,
}

/// Overall tone of the analyzed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Hostile,
}

impl Sentiment {
    /// Lenient parse of model output
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" | "mixed" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            "hostile" | "aggressive" | "angry" => Some(Sentiment::Hostile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Hostile => "hostile",
        }
    }
}

/// Output of the theme/sentiment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeReport {
    pub themes: BTreeSet<String>,
    pub sentiment: Sentiment,
    pub key_phrases: Vec<String>,
    /// Post author, the target of the track
    pub target: String,
    /// Subreddit the post came from
    pub context: String,
}

/// One lyric line in performance order
///
/// Generation produces lines without timing; refinement attaches the hints
/// the aligner locks to the beat grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub text: String,
    /// Seconds from the start of the track
    pub target_start_time: Option<f64>,
    /// Seconds
    pub target_duration: Option<f64>,
}

impl LyricLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target_start_time: None,
            target_duration: None,
        }
    }

    pub fn with_timing(mut self, start: f64, duration: f64) -> Self {
        self.target_start_time = Some(start);
        self.target_duration = Some(duration);
        self
    }

    pub fn has_timing(&self) -> bool {
        self.target_start_time.is_some()
    }
}
