//! Stage error taxonomy
//!
//! Adapters and engine components return [`StageError`] verbatim. Only the
//! orchestrator consults [`StageError::class`] to decide between retrying,
//! aborting, and evicting.

use crate::audio::aligner::AlignmentError;
use crate::audio::mastering::MasteringError;
use crate::audio::onset::AnalysisError;
use std::time::Duration;
use thiserror::Error;

/// How the orchestrator reacts to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout, rate limit: retried with backoff
    Transient,
    /// Bad input, rejected content, insufficient signal: abort immediately
    Permanent,
    /// Cache or storage full: evict, then retry once
    ResourceExhausted,
}

/// Reddit scraper failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("post not found or removed")]
    NotFound,

    #[error("Reddit rate limit hit")]
    RateLimited,

    #[error("Reddit rejected the credentials")]
    AuthFailed,
}

impl ScrapeError {
    pub fn code(&self) -> &'static str {
        match self {
            ScrapeError::NotFound => "NotFound",
            ScrapeError::RateLimited => "RateLimited",
            ScrapeError::AuthFailed => "AuthFailed",
        }
    }
}

/// Failure of a single stage attempt
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Mastering(#[from] MasteringError),

    #[error("stage timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream service rate limit hit")]
    RateLimited,

    /// External tool or service failed in a way a later attempt may not
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("content rejected: {0}")]
    ContentRejected(String),

    /// Unparseable model output; another sample may parse
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An adapter broke its output contract (e.g. refiner changed the line count)
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("storage capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::Scrape(ScrapeError::RateLimited)
            | StageError::Timeout(_)
            | StageError::Network(_)
            | StageError::RateLimited
            | StageError::Unavailable(_)
            | StageError::Malformed(_) => ErrorClass::Transient,

            StageError::Scrape(_)
            | StageError::Analysis(_)
            | StageError::Alignment(_)
            | StageError::Mastering(_)
            | StageError::ContentRejected(_)
            | StageError::InvalidInput(_)
            | StageError::ContractViolation(_)
            | StageError::Internal(_) => ErrorClass::Permanent,

            StageError::CapacityExhausted(_) => ErrorClass::ResourceExhausted,
        }
    }

    /// Short machine-readable cause, e.g. "RateLimited" or "NoReliableTempo"
    pub fn code(&self) -> &'static str {
        match self {
            StageError::Scrape(e) => e.code(),
            StageError::Analysis(e) => e.code(),
            StageError::Alignment(e) => e.code(),
            StageError::Mastering(e) => e.code(),
            StageError::Timeout(_) => "Timeout",
            StageError::Network(_) => "Network",
            StageError::RateLimited => "RateLimited",
            StageError::Unavailable(_) => "Unavailable",
            StageError::ContentRejected(_) => "ContentRejected",
            StageError::Malformed(_) => "Malformed",
            StageError::InvalidInput(_) => "InvalidInput",
            StageError::ContractViolation(_) => "ContractViolation",
            StageError::CapacityExhausted(_) => "CapacityExhausted",
            StageError::Internal(_) => "Internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Map a reqwest transport error onto the taxonomy
impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StageError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            StageError::Malformed(err.to_string())
        } else {
            StageError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(StageError::from(ScrapeError::RateLimited).class(), ErrorClass::Transient);
        assert_eq!(StageError::from(ScrapeError::NotFound).class(), ErrorClass::Permanent);
        assert_eq!(StageError::from(ScrapeError::AuthFailed).class(), ErrorClass::Permanent);
        assert_eq!(
            StageError::from(AnalysisError::NoReliableTempo { found: 1, required: 8 }).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            StageError::from(AlignmentError::NoTimingHints).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            StageError::Timeout(Duration::from_secs(1)).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            StageError::CapacityExhausted("full".into()).class(),
            ErrorClass::ResourceExhausted
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(StageError::from(ScrapeError::RateLimited).code(), "RateLimited");
        assert_eq!(
            StageError::from(AnalysisError::NoReliableTempo { found: 0, required: 8 }).code(),
            "NoReliableTempo"
        );
        assert_eq!(StageError::Timeout(Duration::from_millis(5)).to_string(), "stage timed out after 5 ms");
    }
}
