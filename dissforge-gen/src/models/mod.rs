//! Data model shared by stages, the orchestrator and the HTTP API

pub mod audio;
pub mod beat_grid;
pub mod lyrics;
pub mod request;
pub mod state;

pub use audio::{
    AlignedVocalTrack, BeatAudio, FinalTrack, LineFit, LineSpan, MasteredTrack, MasteringReport,
    MonoAudio, SynthesizedVocals,
};
pub use beat_grid::{BeatGrid, BeatGridError, Subdivision};
pub use lyrics::{LyricLine, ScrapedPost, Sentiment, ThemeReport};
pub use request::{GenerationOptions, LyricStyle, PipelineRequest, RequestError, PIPELINE_VERSION};
pub use state::{GenerationState, IllegalTransition, RunStatus, StageRecord};
