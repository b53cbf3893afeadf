//! Pipeline and store errors

use super::stage::StageKind;
use crate::adapters::{ErrorClass, StageError};
use dissforge_common::Fingerprint;
use thiserror::Error;

/// Artifact store failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("artifact store is full ({capacity} artifacts, none evictable)")]
    CapacityExhausted { capacity: usize },

    #[error("artifact persistence failed: {0}")]
    Persistence(String),
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CapacityExhausted { .. } => StageError::CapacityExhausted(err.to_string()),
            StoreError::Persistence(msg) => StageError::Internal(msg),
        }
    }
}

/// Terminal failure of a generation run
///
/// Display shows the stage and the cause only; the fingerprint is kept for
/// logs and diagnostics and never rendered to users.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {cause}")]
pub struct PipelineError {
    pub stage: StageKind,
    pub fingerprint: Fingerprint,
    /// Attempts made before giving up (0 when the failure preceded any attempt)
    pub attempts: u32,
    pub cause: StageError,
}

impl PipelineError {
    pub fn new(stage: StageKind, fingerprint: Fingerprint, attempts: u32, cause: StageError) -> Self {
        Self {
            stage,
            fingerprint,
            attempts,
            cause,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.cause.class()
    }

    /// Short cause code, e.g. "RateLimited"
    pub fn cause_code(&self) -> &'static str {
        self.cause.code()
    }
}
