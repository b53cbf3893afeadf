//! Audio engine: decoding, resampling, beat analysis, alignment, mastering

pub mod aligner;
pub mod decoder;
pub mod mastering;
pub mod onset;
pub mod resampler;
pub mod stretch;
pub mod wav;

pub use aligner::{AlignerConfig, AlignmentError, VocalAligner};
pub use mastering::{MasteringChain, MasteringConfig, MasteringError};
pub use onset::{AnalysisError, AnalyzerConfig, OnsetTempoAnalyzer};
