//! Theme and sentiment extraction through a language model

use super::error::StageError;
use super::sanitizer::AnalysisCorpus;
use super::{TextTransform, ThemeAnalyzer, TransformRequest};
use crate::config::OllamaConfig;
use crate::models::{Sentiment, ThemeReport};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Themes a diss track can draw on; anything else the model proposes is dropped
pub const CANDIDATE_THEMES: &[&str] = &[
    "wealth/money",
    "success/achievements",
    "skills/talent",
    "authenticity/realness",
    "street credibility",
    "relationships/loyalty",
    "competition/rivalry",
    "past conflicts",
    "personal style",
    "geographic location",
];

const MAX_KEY_PHRASES: usize = 8;
const MAX_CORPUS_CHARS: usize = 6_000;

const SYSTEM_PROMPT: &str = "You analyze social media posts for a battle rap writer. \
Reply with a single JSON object and nothing else.";

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    key_phrases: Vec<String>,
}

pub struct LlmThemeAnalyzer {
    llm: Arc<dyn TextTransform>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmThemeAnalyzer {
    pub fn new(llm: Arc<dyn TextTransform>, config: &OllamaConfig) -> Self {
        Self {
            llm,
            temperature: config.analysis_temperature,
            max_tokens: config.analysis_max_tokens,
        }
    }

    fn prompt(corpus: &AnalysisCorpus) -> String {
        let text: String = corpus.text().chars().take(MAX_CORPUS_CHARS).collect();
        format!(
            "Post by u/{} in r/{}:\n\n{}\n\n\
             Return JSON with keys:\n\
             \"themes\": the themes from this list that apply: {}\n\
             \"sentiment\": one of positive, neutral, negative, hostile\n\
             \"key_phrases\": up to {} short phrases from the post worth referencing",
            corpus.target,
            corpus.context,
            text,
            CANDIDATE_THEMES.join(", "),
            MAX_KEY_PHRASES
        )
    }
}

#[async_trait]
impl ThemeAnalyzer for LlmThemeAnalyzer {
    async fn analyze_text(&self, corpus: &AnalysisCorpus) -> Result<ThemeReport, StageError> {
        if corpus.is_empty() {
            return Err(StageError::InvalidInput("post has no usable text".to_string()));
        }

        let reply = self
            .llm
            .transform(TransformRequest {
                system: SYSTEM_PROMPT.to_string(),
                prompt: Self::prompt(corpus),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
            .await?;

        let report = parse_analysis(&reply, corpus)?;
        debug!(
            themes = report.themes.len(),
            sentiment = report.sentiment.as_str(),
            "Themes extracted"
        );
        Ok(report)
    }
}

/// Parse the model's JSON reply, tolerating prose or code fences around it
pub fn parse_analysis(reply: &str, corpus: &AnalysisCorpus) -> Result<ThemeReport, StageError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &reply[s..=e],
        _ => return Err(StageError::Malformed("no JSON object in analysis reply".to_string())),
    };
    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| StageError::Malformed(format!("analysis reply: {}", e)))?;

    let themes: BTreeSet<String> = raw
        .themes
        .iter()
        .filter_map(|t| match_theme(t))
        .map(str::to_string)
        .collect();

    let key_phrases = raw
        .key_phrases
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(MAX_KEY_PHRASES)
        .collect();

    Ok(ThemeReport {
        themes,
        sentiment: raw
            .sentiment
            .as_deref()
            .and_then(Sentiment::parse)
            .unwrap_or(Sentiment::Neutral),
        key_phrases,
        target: corpus.target.clone(),
        context: corpus.context.clone(),
    })
}

/// Candidate theme named by `proposed`, matching either half of a "a/b" pair
fn match_theme(proposed: &str) -> Option<&'static str> {
    let needle = proposed.trim().to_lowercase();
    CANDIDATE_THEMES.iter().copied().find(|candidate| {
        *candidate == needle || candidate.split('/').any(|part| part == needle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> AnalysisCorpus {
        AnalysisCorpus {
            title: "just bought my third lambo".to_string(),
            body: String::new(),
            comments: vec![],
            target: "rich_guy".to_string(),
            context: "cars".to_string(),
        }
    }

    #[test]
    fn test_parses_fenced_json() {
        let reply = "Here you go:\n```json\n{\"themes\": [\"wealth/money\", \"money\", \"cars\"], \
                     \"sentiment\": \"Hostile\", \"key_phrases\": [\"third lambo\", \" \"]}\n```";
        let report = parse_analysis(reply, &corpus()).unwrap();
        assert_eq!(report.themes.len(), 1);
        assert!(report.themes.contains("wealth/money"));
        assert_eq!(report.sentiment, Sentiment::Hostile);
        assert_eq!(report.key_phrases, vec!["third lambo"]);
        assert_eq!(report.target, "rich_guy");
    }

    #[test]
    fn test_unknown_sentiment_is_neutral() {
        let report = parse_analysis("{\"themes\": [], \"sentiment\": \"meh\"}", &corpus()).unwrap();
        assert_eq!(report.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_prose_is_malformed() {
        let err = parse_analysis("The post is about cars.", &corpus()).unwrap_err();
        assert!(matches!(err, StageError::Malformed(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_prompt_lists_candidates() {
        let prompt = LlmThemeAnalyzer::prompt(&corpus());
        assert!(prompt.contains("street credibility"));
        assert!(prompt.contains("u/rich_guy in r/cars"));
    }
}
