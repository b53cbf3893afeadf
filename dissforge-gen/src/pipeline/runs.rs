//! Run registry
//!
//! Tracks the observable status of every generation run and keeps the
//! results of finished runs for status queries and track downloads. Finished
//! runs are dropped oldest first once `max_finished` is exceeded; active
//! runs are never dropped.
//!
//! A run whose handle is dropped before it settles (client disconnect,
//! caller timeout) is failed with cause `Cancelled` at its last entered stage.

use crate::models::{GenerationState, LyricLine, MasteredTrack, RunStatus, StageRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Failure cause recorded for runs abandoned by their caller
pub const CANCELLED_CAUSE: &str = "Cancelled";

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub lyrics: Arc<Vec<LyricLine>>,
    pub mastered: Arc<MasteredTrack>,
}

struct RunEntry {
    status: RunStatus,
    output: Option<RunOutput>,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, RunEntry>,
    finished: VecDeque<Uuid>,
}

#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<RwLock<Inner>>,
    max_finished: usize,
}

impl RunRegistry {
    pub fn new(max_finished: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            max_finished: max_finished.max(1),
        }
    }

    /// Register a new run in PENDING
    pub async fn start(&self, run_id: Uuid, source_url: &str, beat_id: &str) -> RunHandle {
        let status = RunStatus::new(run_id, source_url.to_string(), beat_id.to_string());
        self.inner.write().await.runs.insert(
            run_id,
            RunEntry {
                status,
                output: None,
            },
        );
        RunHandle {
            run_id,
            registry: self.clone(),
            current_stage: Mutex::new("pending"),
            settled: AtomicBool::new(false),
        }
    }

    pub async fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.inner.read().await.runs.get(&run_id).map(|e| e.status.clone())
    }

    pub async fn output(&self, run_id: Uuid) -> Option<RunOutput> {
        self.inner.read().await.runs.get(&run_id).and_then(|e| e.output.clone())
    }

    /// Runs not yet in a terminal state
    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .runs
            .values()
            .filter(|e| !e.status.is_terminal())
            .count()
    }

    async fn update<F: FnOnce(&mut RunEntry)>(&self, run_id: Uuid, f: F) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.runs.get_mut(&run_id) {
            f(entry);
        }
    }

    async fn finish(&self, run_id: Uuid) {
        let mut inner = self.inner.write().await;
        self.retire(&mut inner, run_id);
    }

    fn retire(&self, inner: &mut Inner, run_id: Uuid) {
        inner.finished.push_back(run_id);
        while inner.finished.len() > self.max_finished {
            if let Some(oldest) = inner.finished.pop_front() {
                inner.runs.remove(&oldest);
            }
        }
    }

    fn cancel_locked(&self, inner: &mut Inner, run_id: Uuid, stage: &str) {
        let Some(entry) = inner.runs.get_mut(&run_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        let failed = GenerationState::Failed {
            stage: stage.to_string(),
            cause: CANCELLED_CAUSE.to_string(),
            message: "run abandoned before completion".to_string(),
        };
        if let Err(e) = entry.status.transition_to(failed) {
            warn!(run_id = %run_id, error = %e, "Could not cancel run");
            return;
        }
        warn!(run_id = %run_id, stage, "Run cancelled before completion");
        self.retire(inner, run_id);
    }
}

/// Handle one run uses to report its progress
///
/// Dropping an unsettled handle fails the run as cancelled.
pub struct RunHandle {
    run_id: Uuid,
    registry: RunRegistry,
    current_stage: Mutex<&'static str>,
    settled: AtomicBool,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Remember the most recently started stage
    pub fn enter_stage(&self, label: &'static str) {
        if let Ok(mut current) = self.current_stage.lock() {
            *current = label;
        }
    }

    fn last_stage(&self) -> &'static str {
        self.current_stage.lock().map(|s| *s).unwrap_or("pending")
    }

    /// Move to `state`; illegal transitions are logged and ignored
    pub async fn advance(&self, state: GenerationState) {
        let run_id = self.run_id;
        self.registry
            .update(run_id, |entry| {
                if let Err(e) = entry.status.transition_to(state) {
                    warn!(run_id = %run_id, error = %e, "Ignoring run state transition");
                }
            })
            .await;
    }

    pub async fn record_stage(&self, record: StageRecord) {
        self.registry
            .update(self.run_id, |entry| entry.status.stages.push(record))
            .await;
    }

    pub async fn complete(&self, output: RunOutput) {
        self.settled.store(true, Ordering::Release);
        let run_id = self.run_id;
        self.registry
            .update(run_id, |entry| {
                entry.output = Some(output);
                if let Err(e) = entry.status.transition_to(GenerationState::Done) {
                    warn!(run_id = %run_id, error = %e, "Run completed out of order");
                }
            })
            .await;
        self.registry.finish(run_id).await;
    }

    pub async fn fail(&self, stage: &str, cause: &str, message: String) {
        self.settled.store(true, Ordering::Release);
        let run_id = self.run_id;
        let failed = GenerationState::Failed {
            stage: stage.to_string(),
            cause: cause.to_string(),
            message,
        };
        self.registry
            .update(run_id, |entry| {
                if let Err(e) = entry.status.transition_to(failed) {
                    warn!(run_id = %run_id, error = %e, "Run failed after reaching a terminal state");
                }
            })
            .await;
        self.registry.finish(run_id).await;
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.settled.load(Ordering::Acquire) {
            return;
        }
        let run_id = self.run_id;
        let stage = self.last_stage();

        if let Ok(mut inner) = self.registry.inner.try_write() {
            self.registry.cancel_locked(&mut inner, run_id, stage);
            return;
        }
        // Lock is busy; settle from a task instead
        let registry = self.registry.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let mut inner = registry.inner.write().await;
                    registry.cancel_locked(&mut inner, run_id, stage);
                });
            }
            Err(_) => warn!(run_id = %run_id, "Run dropped outside a runtime, left unsettled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_is_visible() {
        let registry = RunRegistry::new(4);
        let run_id = Uuid::new_v4();
        let handle = registry.start(run_id, "https://www.reddit.com/comments/x", "a.wav").await;

        handle.advance(GenerationState::Scraping).await;
        handle
            .record_stage(StageRecord {
                stage: "scrape".to_string(),
                cache_hit: false,
                attempts: 1,
                elapsed_ms: 12,
            })
            .await;

        let status = registry.status(run_id).await.unwrap();
        assert_eq!(status.state, GenerationState::Scraping);
        assert_eq!(status.stages.len(), 1);
        assert_eq!(registry.active_count().await, 1);
        assert!(registry.output(run_id).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let registry = RunRegistry::new(4);
        let run_id = Uuid::new_v4();
        let handle = registry.start(run_id, "u", "b").await;
        handle.advance(GenerationState::Scraping).await;
        handle.fail("scrape", "RateLimited", "rate limited".to_string()).await;

        let status = registry.status(run_id).await.unwrap();
        assert_eq!(status.state.name(), "FAILED");
        assert!(status.finished_at.is_some());
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_oldest_finished_runs_are_dropped() {
        let registry = RunRegistry::new(2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let run_id = Uuid::new_v4();
            let handle = registry.start(run_id, "u", "b").await;
            handle.fail("scrape", "NotFound", "gone".to_string()).await;
            ids.push(run_id);
        }
        let active = registry.start(Uuid::new_v4(), "u", "b").await;

        assert!(registry.status(ids[0]).await.is_none());
        assert!(registry.status(ids[1]).await.is_some());
        assert!(registry.status(ids[2]).await.is_some());
        assert!(registry.status(active.run_id()).await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels_run() {
        let registry = RunRegistry::new(4);
        let run_id = Uuid::new_v4();
        let handle = registry.start(run_id, "u", "b").await;
        handle.advance(GenerationState::Scraping).await;
        handle.enter_stage("scrape");
        drop(handle);

        let status = registry.status(run_id).await.unwrap();
        assert_eq!(
            status.state,
            GenerationState::Failed {
                stage: "scrape".to_string(),
                cause: CANCELLED_CAUSE.to_string(),
                message: "run abandoned before completion".to_string(),
            }
        );
        assert!(status.finished_at.is_some());
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_settled_handle_drop_keeps_outcome() {
        let registry = RunRegistry::new(4);
        let run_id = Uuid::new_v4();
        let handle = registry.start(run_id, "u", "b").await;
        handle.fail("scrape", "NotFound", "gone".to_string()).await;
        drop(handle);

        let status = registry.status(run_id).await.unwrap();
        match status.state {
            GenerationState::Failed { cause, .. } => assert_eq!(cause, "NotFound"),
            other => panic!("expected FAILED, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_runs_are_evicted_like_finished_ones() {
        let registry = RunRegistry::new(1);
        let first = Uuid::new_v4();
        drop(registry.start(first, "u", "b").await);
        drop(registry.start(Uuid::new_v4(), "u", "b").await);

        assert!(registry.status(first).await.is_none());
        assert_eq!(registry.active_count().await, 0);
    }
}
