//! Lyric generation and refinement through a language model
//!
//! The generator writes plain lines; the refiner tightens them line by line
//! (same count, same order) and attaches the timing hints the aligner needs.

use super::error::StageError;
use super::{LyricGenerator, LyricRefiner, TextTransform, TransformRequest};
use crate::config::OllamaConfig;
use crate::models::{GenerationOptions, LyricLine, ThemeReport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tempo the timing hints are written against; the aligner snaps them to the real grid
pub const NOMINAL_BPM: f64 = 90.0;

/// Lines opening with these words are commentary, not lyrics
const COMMENTARY_PREFIXES: &[&str] = &[
    "here", "enhanced", "original", "verse", "chorus", "hook", "improved", "note", "adding", "outro",
];

const GENERATOR_SYSTEM: &str = "You are a skilled battle rapper who excels at writing diss tracks.";

const REFINER_SYSTEM: &str = "You are a master battle rapper focused on improving flow and \
punchlines while maintaining the original message. Output only the enhanced lyrics without any \
tags, directions, or explanations.";

pub struct LlmLyricGenerator {
    llm: Arc<dyn TextTransform>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmLyricGenerator {
    pub fn new(llm: Arc<dyn TextTransform>, config: &OllamaConfig) -> Self {
        Self {
            llm,
            temperature: config.generate_temperature,
            max_tokens: config.generate_max_tokens,
        }
    }

    fn prompt(report: &ThemeReport, options: &GenerationOptions) -> String {
        let themes = if report.themes.is_empty() {
            "anything in the post".to_string()
        } else {
            report.themes.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let phrases = if report.key_phrases.is_empty() {
            String::new()
        } else {
            format!("\nWork in these phrases from the post: {}", report.key_phrases.join("; "))
        };
        format!(
            "Generate a {} diss track targeting {} from r/{}.\n\
             Main themes to focus on: {}\n\
             The overall mood of the post is {}.{}\n\n\
             The track should include clever wordplay and metaphors, reference the target's \
             background, keep a clear flow and rhythm, and land punchlines that hit hard.\n\n\
             Structure:\n\
             - 8 lines for verse 1\n\
             - 4 lines for the hook\n\
             - 8 lines for verse 2\n\
             - 4 lines for the outro\n\n\
             Write one bar per line. Output only the lyrics, no section labels.",
            options.style.prompt_word(),
            report.target,
            report.context,
            themes,
            report.sentiment.as_str(),
            phrases
        )
    }
}

#[async_trait]
impl LyricGenerator for LlmLyricGenerator {
    async fn generate(
        &self,
        report: &ThemeReport,
        options: &GenerationOptions,
    ) -> Result<Vec<LyricLine>, StageError> {
        let reply = self
            .llm
            .transform(TransformRequest {
                system: GENERATOR_SYSTEM.to_string(),
                prompt: Self::prompt(report, options),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
            .await?;

        let lines = clean_lyrics(&reply);
        if lines.is_empty() {
            return Err(StageError::Malformed("no usable lyric lines in reply".to_string()));
        }
        debug!(lines = lines.len(), "Lyrics generated");
        Ok(lines.into_iter().map(LyricLine::new).collect())
    }
}

pub struct LlmLyricRefiner {
    llm: Arc<dyn TextTransform>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmLyricRefiner {
    pub fn new(llm: Arc<dyn TextTransform>, config: &OllamaConfig) -> Self {
        Self {
            llm,
            temperature: config.refine_temperature,
            max_tokens: config.refine_max_tokens,
        }
    }

    fn prompt(lines: &[LyricLine], options: &GenerationOptions) -> String {
        let numbered: Vec<String> = lines
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{}. {}", i + 1, l.text))
            .collect();
        format!(
            "Enhance the following {} lines while keeping their core message.\n\
             Tighten internal rhymes, add wordplay, strengthen punchlines and keep syllable \
             patterns consistent. Flow complexity: {} out of 10.\n\n\
             Keep exactly {} lines, in the same order, numbered the same way.\n\n{}\n\n\
             Provide ONLY the numbered lines. Do not include [pause], [emph] or other markers.",
            lines.len(),
            options.flow_complexity,
            lines.len(),
            numbered.join("\n")
        )
    }
}

#[async_trait]
impl LyricRefiner for LlmLyricRefiner {
    async fn refine(
        &self,
        lines: &[LyricLine],
        options: &GenerationOptions,
    ) -> Result<Vec<LyricLine>, StageError> {
        if lines.is_empty() {
            return Err(StageError::InvalidInput("nothing to refine".to_string()));
        }

        let reply = self
            .llm
            .transform(TransformRequest {
                system: REFINER_SYSTEM.to_string(),
                prompt: Self::prompt(lines, options),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
            .await?;

        let texts = merge_refined(lines, &reply);
        Ok(attach_timing(texts, options.flow_complexity))
    }
}

/// Plain lyric lines from a model reply
pub fn clean_lyrics(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_commentary(l))
        .map(strip_markup)
        .filter(|l| !l.is_empty())
        .collect()
}

fn is_commentary(line: &str) -> bool {
    let lower = line
        .trim_start_matches(|c: char| matches!(c, '#' | '*' | '_' | '[' | '(' | ' '))
        .to_lowercase();
    COMMENTARY_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Remove markdown and `[...]`, `<...>`, `(...)` directions
fn strip_markup(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut closing: Option<char> = None;
    for c in line.chars() {
        if let Some(close) = closing {
            if c == close {
                closing = None;
            }
            continue;
        }
        match c {
            '[' => closing = Some(']'),
            '<' => closing = Some('>'),
            '(' => closing = Some(')'),
            '*' | '_' | '~' | '`' | '#' => {}
            _ => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a leading `12.` / `12)` / `12:` number off a line
fn split_number(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let digits = trimmed.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let rest = &trimmed[digits..];
    let rest = rest.strip_prefix(&['.', ')', ':'][..])?;
    Some((trimmed[..digits].parse().ok()?, rest))
}

/// Refined text per line, falling back to the original for anything the model dropped
pub fn merge_refined(originals: &[LyricLine], reply: &str) -> Vec<String> {
    let mut numbered: HashMap<usize, String> = HashMap::new();
    let mut unnumbered: Vec<String> = Vec::new();

    for raw in reply.lines() {
        match split_number(raw) {
            Some((n, text)) => {
                let text = strip_markup(text);
                if !text.is_empty() {
                    numbered.entry(n).or_insert(text);
                }
            }
            None => {
                let trimmed = raw.trim();
                if !trimmed.is_empty() && !is_commentary(trimmed) {
                    let text = strip_markup(trimmed);
                    if !text.is_empty() {
                        unnumbered.push(text);
                    }
                }
            }
        }
    }

    // A reply that ignored the numbering but kept the line count is positional
    if numbered.is_empty() && unnumbered.len() == originals.len() {
        return unnumbered;
    }

    let mut fallbacks = 0;
    let merged = originals
        .iter()
        .enumerate()
        .map(|(i, original)| {
            numbered.remove(&(i + 1)).unwrap_or_else(|| {
                fallbacks += 1;
                original.text.clone()
            })
        })
        .collect();
    if fallbacks > 0 {
        warn!(fallbacks, lines = originals.len(), "Refiner dropped lines, keeping originals");
    }
    merged
}

/// Syllables per second at a flow complexity
fn syllable_rate(flow_complexity: u8) -> f64 {
    3.5 + 0.35 * flow_complexity as f64
}

/// Rough English syllable count: vowel groups per word, at least one per word
pub fn estimate_syllables(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| {
            let mut groups = 0;
            let mut in_vowel = false;
            for c in word.chars().filter(|c| c.is_alphabetic()) {
                let vowel = matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
                if vowel && !in_vowel {
                    groups += 1;
                }
                in_vowel = vowel;
            }
            let lower = word.to_lowercase();
            let silent_e = lower.ends_with('e') && !lower.ends_with("le") && groups > 1;
            (groups - usize::from(silent_e)).max(1)
        })
        .sum()
}

/// Heuristic hints: duration from syllables, rounded up to whole nominal beats; starts are running sums
pub fn attach_timing(texts: Vec<String>, flow_complexity: u8) -> Vec<LyricLine> {
    let beat = 60.0 / NOMINAL_BPM;
    let rate = syllable_rate(flow_complexity);
    let mut start = 0.0;
    texts
        .into_iter()
        .map(|text| {
            let spoken = estimate_syllables(&text) as f64 / rate;
            let beats = (spoken / beat).ceil().max(1.0);
            let duration = beats * beat;
            let line = LyricLine::new(text).with_timing(start, duration);
            start += duration;
            line
        })
        .collect()
}
