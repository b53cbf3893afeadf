//! Stage artifacts
//!
//! An artifact is produced once, published to the store, and never mutated.
//! Payloads are held behind `Arc` so stages and runs share buffers instead of
//! copying them.

use super::stage::StageKind;
use crate::models::{
    AlignedVocalTrack, BeatAudio, BeatGrid, LyricLine, MasteredTrack, ScrapedPost, SynthesizedVocals,
    ThemeReport,
};
use chrono::{DateTime, Utc};
use dissforge_common::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Post(Arc<ScrapedPost>),
    Themes(Arc<ThemeReport>),
    Lyrics(Arc<Vec<LyricLine>>),
    Vocals(Arc<SynthesizedVocals>),
    Beat(Arc<BeatAudio>),
    Grid(Arc<BeatGrid>),
    Aligned(Arc<AlignedVocalTrack>),
    Mastered(Arc<MasteredTrack>),
}

impl ArtifactPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ArtifactPayload::Post(_) => "post",
            ArtifactPayload::Themes(_) => "themes",
            ArtifactPayload::Lyrics(_) => "lyrics",
            ArtifactPayload::Vocals(_) => "vocals",
            ArtifactPayload::Beat(_) => "beat",
            ArtifactPayload::Grid(_) => "grid",
            ArtifactPayload::Aligned(_) => "aligned",
            ArtifactPayload::Mastered(_) => "mastered",
        }
    }
}

/// Typed access to a payload variant
pub trait StageOutput: Sized + Send + Sync + 'static {
    fn into_payload(value: Arc<Self>) -> ArtifactPayload;
    fn from_payload(payload: &ArtifactPayload) -> Option<Arc<Self>>;
}

macro_rules! stage_output {
    ($ty:ty, $variant:ident) => {
        impl StageOutput for $ty {
            fn into_payload(value: Arc<Self>) -> ArtifactPayload {
                ArtifactPayload::$variant(value)
            }

            fn from_payload(payload: &ArtifactPayload) -> Option<Arc<Self>> {
                match payload {
                    ArtifactPayload::$variant(value) => Some(Arc::clone(value)),
                    _ => None,
                }
            }
        }
    };
}

stage_output!(ScrapedPost, Post);
stage_output!(ThemeReport, Themes);
stage_output!(Vec<LyricLine>, Lyrics);
stage_output!(SynthesizedVocals, Vocals);
stage_output!(BeatAudio, Beat);
stage_output!(BeatGrid, Grid);
stage_output!(AlignedVocalTrack, Aligned);
stage_output!(MasteredTrack, Mastered);

/// Immutable record of one stage result
#[derive(Debug, Clone, PartialEq)]
pub struct StageArtifact {
    pub stage: StageKind,
    pub fingerprint: Fingerprint,
    pub payload: ArtifactPayload,
    pub produced_at: DateTime<Utc>,
    pub upstream: BTreeSet<Fingerprint>,
}

impl StageArtifact {
    pub fn new(
        stage: StageKind,
        fingerprint: Fingerprint,
        payload: ArtifactPayload,
        upstream: BTreeSet<Fingerprint>,
    ) -> Self {
        Self {
            stage,
            fingerprint,
            payload,
            produced_at: Utc::now(),
            upstream,
        }
    }

    /// Typed view of the payload, `None` if the variant does not match
    pub fn output<T: StageOutput>(&self) -> Option<Arc<T>> {
        T::from_payload(&self.payload)
    }
}
