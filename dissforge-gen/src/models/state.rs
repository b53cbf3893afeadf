//! Generation run state machine
//!
//! PENDING → SCRAPING → ANALYZING → GENERATING → REFINING → SYNTHESIZING →
//! ALIGNING → MASTERING → DONE, with FAILED(stage, cause) reachable from any
//! non-terminal state. A cache hit still walks through its state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Run state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum GenerationState {
    Pending,
    Scraping,
    Analyzing,
    Generating,
    Refining,
    Synthesizing,
    Aligning,
    Mastering,
    Done,
    /// Absorbing failure state
    Failed {
        /// Stage label, e.g. "scrape"
        stage: String,
        /// Short cause code, e.g. "RateLimited"
        cause: String,
        /// Human-readable explanation
        message: String,
    },
}

/// Attempted transition not allowed by the state machine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

impl GenerationState {
    /// Ordinal of the forward states; `None` for FAILED
    fn ordinal(&self) -> Option<u8> {
        Some(match self {
            GenerationState::Pending => 0,
            GenerationState::Scraping => 1,
            GenerationState::Analyzing => 2,
            GenerationState::Generating => 3,
            GenerationState::Refining => 4,
            GenerationState::Synthesizing => 5,
            GenerationState::Aligning => 6,
            GenerationState::Mastering => 7,
            GenerationState::Done => 8,
            GenerationState::Failed { .. } => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            GenerationState::Pending => "PENDING",
            GenerationState::Scraping => "SCRAPING",
            GenerationState::Analyzing => "ANALYZING",
            GenerationState::Generating => "GENERATING",
            GenerationState::Refining => "REFINING",
            GenerationState::Synthesizing => "SYNTHESIZING",
            GenerationState::Aligning => "ALIGNING",
            GenerationState::Mastering => "MASTERING",
            GenerationState::Done => "DONE",
            GenerationState::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationState::Done | GenerationState::Failed { .. })
    }

    /// Whether `next` is a legal successor: the next forward state, or FAILED
    /// from any non-terminal state
    pub fn can_transition_to(&self, next: &GenerationState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.ordinal(), next.ordinal()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        }
    }
}

/// Per-stage bookkeeping for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub cache_hit: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Observable status of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub state: GenerationState,
    pub source_url: String,
    pub beat_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
}

impl RunStatus {
    pub fn new(run_id: Uuid, source_url: String, beat_id: String) -> Self {
        Self {
            run_id,
            state: GenerationState::Pending,
            source_url,
            beat_id,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    /// Apply a transition, recording the end time on terminal states
    pub fn transition_to(&mut self, next: GenerationState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(&next) {
            return Err(IllegalTransition {
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.state = next;
        if self.state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
