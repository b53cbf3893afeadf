//! In-process adapters that count their calls

use super::audio_generator::{beat_120_bpm, spoken_lines};
use async_trait::async_trait;
use dissforge_gen::adapters::{
    Adapters, AnalysisCorpus, BeatSource, LyricGenerator, LyricRefiner, PostScraper, StageError,
    ThemeAnalyzer, VocalSynthesizer,
};
use dissforge_gen::models::{
    BeatAudio, GenerationOptions, LyricLine, ScrapedPost, Sentiment, SynthesizedVocals, ThemeReport,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Natural spoken durations of the four test lines, in seconds
pub const LINE_DURATIONS: [f64; 4] = [1.0, 0.8, 1.2, 0.9];

/// Seconds per beat at 120 BPM
pub const BEAT_PERIOD: f64 = 0.5;

/// Calls per adapter
#[derive(Debug, Default)]
pub struct CallCounts {
    pub scrape: AtomicUsize,
    pub analyze: AtomicUsize,
    pub generate: AtomicUsize,
    pub refine: AtomicUsize,
    pub synthesize: AtomicUsize,
    pub beat: AtomicUsize,
}

/// Current value of one counter
pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

impl CallCounts {
    pub fn total(&self) -> usize {
        [
            &self.scrape,
            &self.analyze,
            &self.generate,
            &self.refine,
            &self.synthesize,
            &self.beat,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

/// Behavior knobs for the fake services
#[derive(Clone)]
pub struct FakeServices {
    pub calls: Arc<CallCounts>,
    /// Returned by every scrape call when set
    pub scrape_error: Option<StageError>,
    /// Scrape calls sleep this long before answering
    pub scrape_delay: Option<Duration>,
    pub beat: BeatAudio,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(CallCounts::default()),
            scrape_error: None,
            scrape_delay: None,
            beat: beat_120_bpm(),
        }
    }

    pub fn with_scrape_error(mut self, error: StageError) -> Self {
        self.scrape_error = Some(error);
        self
    }

    pub fn with_scrape_delay(mut self, delay: Duration) -> Self {
        self.scrape_delay = Some(delay);
        self
    }

    pub fn with_beat(mut self, beat: BeatAudio) -> Self {
        self.beat = beat;
        self
    }

    pub fn adapters(&self) -> Adapters {
        let shared = Arc::new(self.clone());
        Adapters {
            scraper: shared.clone(),
            analyzer: shared.clone(),
            generator: shared.clone(),
            refiner: shared.clone(),
            synthesizer: shared.clone(),
            beats: shared,
        }
    }
}

#[async_trait]
impl PostScraper for FakeServices {
    async fn scrape(&self, _post_url: &str) -> Result<ScrapedPost, StageError> {
        self.calls.scrape.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.scrape_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.scrape_error {
            return Err(error.clone());
        }
        Ok(ScrapedPost {
            title: "I think tabs are better than spaces".to_string(),
            body: "Fight me. Every editor supports them.".to_string(),
            author: "tabmaster9000".to_string(),
            subreddit: "programming".to_string(),
            score: 42,
            top_comments: vec![
                "Imagine still arguing about this".to_string(),
                "Your code review must be a war zone".to_string(),
            ],
        })
    }
}

#[async_trait]
impl ThemeAnalyzer for FakeServices {
    async fn analyze_text(&self, corpus: &AnalysisCorpus) -> Result<ThemeReport, StageError> {
        self.calls.analyze.fetch_add(1, Ordering::SeqCst);
        Ok(ThemeReport {
            themes: BTreeSet::from(["indentation".to_string(), "stubbornness".to_string()]),
            sentiment: Sentiment::Hostile,
            key_phrases: vec!["tabs are better".to_string()],
            target: corpus.target.clone(),
            context: corpus.context.clone(),
        })
    }
}

#[async_trait]
impl LyricGenerator for FakeServices {
    async fn generate(
        &self,
        report: &ThemeReport,
        _options: &GenerationOptions,
    ) -> Result<Vec<LyricLine>, StageError> {
        self.calls.generate.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            LyricLine::new(format!("Yo {} your tabs are a crime", report.target)),
            LyricLine::new("Your diffs look wrong every single time"),
            LyricLine::new("Spaces line up while your columns drift"),
            LyricLine::new("Hit save once more and watch the whole file shift"),
        ])
    }
}

#[async_trait]
impl LyricRefiner for FakeServices {
    async fn refine(
        &self,
        lines: &[LyricLine],
        _options: &GenerationOptions,
    ) -> Result<Vec<LyricLine>, StageError> {
        self.calls.refine.fetch_add(1, Ordering::SeqCst);
        // One beat per line, starting on the second beat
        Ok(lines
            .iter()
            .enumerate()
            .map(|(i, line)| line.clone().with_timing(BEAT_PERIOD * (i + 1) as f64, BEAT_PERIOD))
            .collect())
    }
}

#[async_trait]
impl VocalSynthesizer for FakeServices {
    async fn synthesize(&self, lines: &[LyricLine]) -> Result<SynthesizedVocals, StageError> {
        self.calls.synthesize.fetch_add(1, Ordering::SeqCst);
        let durations: Vec<f64> = (0..lines.len())
            .map(|i| LINE_DURATIONS[i % LINE_DURATIONS.len()])
            .collect();
        Ok(spoken_lines(&durations))
    }
}

#[async_trait]
impl BeatSource for FakeServices {
    async fn load(&self, _beat_id: &str) -> Result<BeatAudio, StageError> {
        self.calls.beat.fetch_add(1, Ordering::SeqCst);
        Ok(self.beat.clone())
    }
}
