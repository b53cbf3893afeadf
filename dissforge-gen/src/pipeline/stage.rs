//! Stage identities

use crate::models::GenerationState;
use std::fmt;

/// Every stage of the generation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Scrape,
    Analyze,
    Generate,
    Refine,
    Synthesize,
    BeatLoad,
    BeatGrid,
    Align,
    Master,
}

impl StageKind {
    pub const ALL: [StageKind; 9] = [
        StageKind::Scrape,
        StageKind::Analyze,
        StageKind::Generate,
        StageKind::Refine,
        StageKind::Synthesize,
        StageKind::BeatLoad,
        StageKind::BeatGrid,
        StageKind::Align,
        StageKind::Master,
    ];

    /// Name used in fingerprints, events and error reports
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Scrape => "scrape",
            StageKind::Analyze => "theme-analysis",
            StageKind::Generate => "lyric-generation",
            StageKind::Refine => "refinement",
            StageKind::Synthesize => "synthesis",
            StageKind::BeatLoad => "beat-load",
            StageKind::BeatGrid => "beat-grid",
            StageKind::Align => "alignment",
            StageKind::Master => "mastering",
        }
    }

    pub fn from_label(label: &str) -> Option<StageKind> {
        StageKind::ALL.into_iter().find(|k| k.label() == label)
    }

    /// Key of the stage's section under `[generator.stages]`
    pub fn config_key(&self) -> &'static str {
        match self {
            StageKind::Scrape => "scrape",
            StageKind::Analyze => "analyze",
            StageKind::Generate => "generate",
            StageKind::Refine => "refine",
            StageKind::Synthesize => "synthesize",
            StageKind::BeatLoad => "beat_load",
            StageKind::BeatGrid => "beat_grid",
            StageKind::Align => "align",
            StageKind::Master => "master",
        }
    }

    /// Run state entered when this stage starts; the beat branch has none of its own
    pub fn run_state(&self) -> Option<GenerationState> {
        match self {
            StageKind::Scrape => Some(GenerationState::Scraping),
            StageKind::Analyze => Some(GenerationState::Analyzing),
            StageKind::Generate => Some(GenerationState::Generating),
            StageKind::Refine => Some(GenerationState::Refining),
            StageKind::Synthesize => Some(GenerationState::Synthesizing),
            StageKind::Align => Some(GenerationState::Aligning),
            StageKind::Master => Some(GenerationState::Mastering),
            StageKind::BeatLoad | StageKind::BeatGrid => None,
        }
    }

    /// Whether the artifact is written through to the database
    ///
    /// Decoded beats are large and cheap to rebuild from the library, so they
    /// stay memory-only.
    pub fn persisted(&self) -> bool {
        !matches!(self, StageKind::BeatLoad)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_unique() {
        let labels: std::collections::HashSet<_> = StageKind::ALL.iter().map(|k| k.label()).collect();
        assert_eq!(labels.len(), StageKind::ALL.len());
        for kind in StageKind::ALL {
            assert_eq!(StageKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(StageKind::from_label("nope"), None);
    }

    #[test]
    fn test_text_chain_maps_to_states() {
        assert_eq!(StageKind::Scrape.run_state(), Some(GenerationState::Scraping));
        assert_eq!(StageKind::BeatGrid.run_state(), None);
        assert_eq!(StageKind::Scrape.to_string(), "scrape");
    }
}
