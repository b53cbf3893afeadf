//! Pipeline orchestrator
//!
//! Drives one request through the stage graph:
//!
//! ```text
//! scrape → theme-analysis → lyric-generation → refinement → synthesis ─┐
//!                                                                     ├→ alignment → mastering
//! beat-load → beat-grid ──────────────────────────────────────────────┘
//! ```
//!
//! The text chain and the beat branch run concurrently on the caller's task
//! and are joined before alignment. Every stage first claims its fingerprint
//! in the artifact store; a hit skips the adapter entirely. Misses run under
//! the stage's timeout and retry policy, and the result is published
//! atomically. CPU-bound stages run on the blocking pool.

use super::artifact::{StageArtifact, StageOutput};
use super::error::PipelineError;
use super::graph::{GraphError, StageGraph};
use super::retry::retry_with_backoff;
use super::runs::{RunHandle, RunOutput, RunRegistry};
use super::stage::StageKind;
use super::store::{ArtifactStore, Claim, PinGuard};
use crate::adapters::{Adapters, AnalysisCorpus, ErrorClass, StageError};
use crate::audio::{MasteringChain, OnsetTempoAnalyzer, VocalAligner};
use crate::config::GeneratorConfig;
use crate::models::{FinalTrack, LyricLine, MasteredTrack, PipelineRequest, StageRecord};
use chrono::Utc;
use dissforge_common::events::{EventBus, GenerationEvent};
use dissforge_common::{Error, Fingerprint};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A successfully generated track
#[derive(Debug, Clone)]
pub struct GeneratedTrack {
    pub run_id: Uuid,
    /// Identity of the request (hash of URL, beat and pipeline version)
    pub request: Fingerprint,
    pub lyrics: Arc<Vec<LyricLine>>,
    pub mastered: Arc<MasteredTrack>,
}

impl GeneratedTrack {
    pub fn track(&self) -> &FinalTrack {
        &self.mastered.track
    }
}

pub struct Orchestrator {
    config: Arc<GeneratorConfig>,
    adapters: Adapters,
    store: ArtifactStore,
    runs: RunRegistry,
    events: EventBus,
    analyzer: Arc<OnsetTempoAnalyzer>,
    aligner: Arc<VocalAligner>,
    mastering: Arc<MasteringChain>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<GeneratorConfig>,
        adapters: Adapters,
        store: ArtifactStore,
        events: EventBus,
    ) -> dissforge_common::Result<Self> {
        let analyzer = OnsetTempoAnalyzer::new(config.analyzer.clone())
            .map_err(|e| Error::Config(format!("analyzer: {}", e)))?;
        let aligner = VocalAligner::new(config.aligner.clone())
            .map_err(|e| Error::Config(format!("aligner: {}", e)))?;
        let mastering = MasteringChain::new(config.mastering.clone());

        Ok(Self {
            runs: RunRegistry::new(config.server.max_finished_runs),
            config,
            adapters,
            store,
            events,
            analyzer: Arc::new(analyzer),
            aligner: Arc::new(aligner),
            mastering: Arc::new(mastering),
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Generate a track under a fresh run id
    pub async fn generate(&self, request: PipelineRequest) -> Result<GeneratedTrack, PipelineError> {
        self.run(Uuid::new_v4(), request).await
    }

    /// Generate a track, reporting progress under `run_id`
    pub async fn run(&self, run_id: Uuid, request: PipelineRequest) -> Result<GeneratedTrack, PipelineError> {
        let run = self
            .runs
            .start(run_id, request.source_url(), request.beat_id())
            .await;
        self.events.emit(GenerationEvent::GenerationStarted {
            run_id,
            source_url: request.source_url().to_string(),
            timestamp: Utc::now(),
        });
        info!(
            run_id = %run_id,
            url = %request.source_url(),
            beat = %request.beat_id(),
            "Generation started"
        );
        let started = Instant::now();

        let result = self.execute(&run, &request).await;

        match &result {
            Ok(generated) => {
                let duration_seconds = generated.track().duration_seconds;
                run.complete(RunOutput {
                    lyrics: Arc::clone(&generated.lyrics),
                    mastered: Arc::clone(&generated.mastered),
                })
                .await;
                self.events.emit(GenerationEvent::GenerationCompleted {
                    run_id,
                    duration_seconds,
                    timestamp: Utc::now(),
                });
                info!(
                    run_id = %run_id,
                    seconds = format!("{:.1}", duration_seconds),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Generation completed"
                );
            }
            Err(e) => {
                run.fail(e.stage.label(), e.cause_code(), e.cause.to_string()).await;
                self.events.emit(GenerationEvent::GenerationFailed {
                    run_id,
                    stage: e.stage.label().to_string(),
                    cause: e.cause_code().to_string(),
                    message: e.cause.to_string(),
                    timestamp: Utc::now(),
                });
                error!(
                    run_id = %run_id,
                    stage = %e.stage,
                    cause = e.cause_code(),
                    attempts = e.attempts,
                    "Generation failed: {}",
                    e.cause
                );
                debug!(run_id = %run_id, fingerprint = %e.fingerprint.short(), "Failed artifact");
            }
        }
        result
    }

    async fn execute(&self, run: &RunHandle, request: &PipelineRequest) -> Result<GeneratedTrack, PipelineError> {
        let graph = StageGraph::plan(request, &self.config).map_err(|e| graph_failure(request, e))?;
        let options = request.options();

        let text_chain = async {
            let post = self
                .run_stage(run, &graph, StageKind::Scrape, move |_| {
                    self.adapters.scraper.scrape(request.source_url())
                })
                .await?;

            let corpus = AnalysisCorpus::from_post(&post);
            let corpus = &corpus;
            let themes = self
                .run_stage(run, &graph, StageKind::Analyze, move |_| {
                    self.adapters.analyzer.analyze_text(corpus)
                })
                .await?;

            let themes = &themes;
            let generated = self
                .run_stage(run, &graph, StageKind::Generate, move |_| {
                    self.adapters.generator.generate(themes, options)
                })
                .await?;

            let generated = &generated;
            let refined = self
                .run_stage(run, &graph, StageKind::Refine, move |_| async move {
                    let refined = self.adapters.refiner.refine(generated.as_slice(), options).await?;
                    if refined.len() != generated.len() {
                        return Err(StageError::ContractViolation(format!(
                            "refiner returned {} lines for {}",
                            refined.len(),
                            generated.len()
                        )));
                    }
                    Ok::<_, StageError>(refined)
                })
                .await?;

            let lines = &refined;
            let vocals = self
                .run_stage(run, &graph, StageKind::Synthesize, move |_| async move {
                    let vocals = self.adapters.synthesizer.synthesize(lines.as_slice()).await?;
                    if vocals.lines.len() != lines.len() {
                        return Err(StageError::ContractViolation(format!(
                            "synthesizer returned {} line spans for {} lines",
                            vocals.lines.len(),
                            lines.len()
                        )));
                    }
                    Ok::<_, StageError>(vocals)
                })
                .await?;

            Ok::<_, PipelineError>((refined, vocals))
        };

        let beat_branch = async {
            let beat = self
                .run_stage(run, &graph, StageKind::BeatLoad, move |_| {
                    self.adapters.beats.load(request.beat_id())
                })
                .await?;

            let analyzer = Arc::clone(&self.analyzer);
            let source = Arc::clone(&beat);
            let grid = self
                .run_stage(run, &graph, StageKind::BeatGrid, move |_| {
                    let analyzer = Arc::clone(&analyzer);
                    let beat = Arc::clone(&source);
                    run_blocking(move || analyzer.analyze_beat(&beat).map_err(StageError::from))
                })
                .await?;

            Ok::<_, PipelineError>((beat, grid))
        };

        let ((lyrics, vocals), (beat, grid)) = tokio::try_join!(text_chain, beat_branch)?;

        let aligner = Arc::clone(&self.aligner);
        let lines = Arc::clone(&lyrics);
        let aligned = self
            .run_stage(run, &graph, StageKind::Align, move |_| {
                let aligner = Arc::clone(&aligner);
                let (vocals, lyrics, grid) = (Arc::clone(&vocals), Arc::clone(&lines), Arc::clone(&grid));
                run_blocking(move || aligner.align(&vocals, &lyrics, &grid).map_err(StageError::from))
            })
            .await?;

        let mastering = Arc::clone(&self.mastering);
        let source = request.fingerprint();
        let mastered = self
            .run_stage(run, &graph, StageKind::Master, move |_| {
                let mastering = Arc::clone(&mastering);
                let (aligned, beat) = (Arc::clone(&aligned), Arc::clone(&beat));
                run_blocking(move || mastering.master(&aligned, &beat, source).map_err(StageError::from))
            })
            .await?;

        Ok(GeneratedTrack {
            run_id: run.run_id(),
            request: source,
            lyrics,
            mastered,
        })
    }

    /// Produce or fetch the artifact of one stage
    async fn run_stage<T, F, Fut>(
        &self,
        run: &RunHandle,
        graph: &StageGraph,
        kind: StageKind,
        produce: F,
    ) -> Result<Arc<T>, PipelineError>
    where
        T: StageOutput,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let node = graph.node(kind).map_err(|e| internal_failure(kind, e))?;
        let fingerprint = node.fingerprint;
        let upstream = graph
            .upstream_fingerprints(kind)
            .map_err(|e| internal_failure(kind, e))?;
        let fail = move |attempts: u32, cause: StageError| PipelineError::new(kind, fingerprint, attempts, cause);

        run.enter_stage(kind.label());
        if let Some(state) = kind.run_state() {
            run.advance(state).await;
        }
        let run_id = run.run_id();
        self.events.emit(GenerationEvent::StageStarted {
            run_id,
            stage: kind.label().to_string(),
            timestamp: Utc::now(),
        });
        debug!(run_id = %run_id, stage = %kind, fingerprint = %fingerprint.short(), "Stage started");
        let started = Instant::now();

        let mut slot = match self.store.claim(fingerprint).await {
            Claim::Ready(artifact) => {
                let value = artifact.output::<T>().ok_or_else(|| {
                    fail(
                        0,
                        StageError::Internal(format!(
                            "cached {} artifact holds a {} payload",
                            kind,
                            artifact.payload.kind_name()
                        )),
                    )
                })?;
                self.finish_stage(run, kind, true, 0, started).await;
                return Ok(value);
            }
            Claim::Produce(slot) => slot,
        };

        // Inputs of an in-flight computation must not be evicted
        let _pins: Vec<PinGuard> = upstream.iter().map(|fp| self.store.pin(*fp)).collect();

        let events = self.events.clone();
        let policy = self.config.stages.policy(kind);
        let (value, attempts) = retry_with_backoff(
            kind.label(),
            policy,
            |attempt, backoff, err| {
                events.emit(GenerationEvent::StageRetrying {
                    run_id,
                    stage: kind.label().to_string(),
                    attempt,
                    backoff_ms: backoff.as_millis() as u64,
                    cause: err.code().to_string(),
                    timestamp: Utc::now(),
                });
            },
            produce,
        )
        .await
        .map_err(|failure| fail(failure.attempts, failure.error))?;

        let value = Arc::new(value);
        let artifact = Arc::new(StageArtifact::new(
            kind,
            fingerprint,
            T::into_payload(Arc::clone(&value)),
            upstream,
        ));

        if let Err(err) = slot.publish(Arc::clone(&artifact)).await {
            let cause = StageError::from(err);
            if cause.class() != ErrorClass::ResourceExhausted {
                return Err(fail(attempts, cause));
            }
            let evicted = self.store.evict();
            warn!(stage = %kind, evicted, "Artifact store full, retrying publish after eviction");
            slot.publish(artifact)
                .await
                .map_err(|e| fail(attempts, StageError::from(e)))?;
        }

        self.finish_stage(run, kind, false, attempts, started).await;
        Ok(value)
    }

    async fn finish_stage(&self, run: &RunHandle, kind: StageKind, cache_hit: bool, attempts: u32, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        run.record_stage(StageRecord {
            stage: kind.label().to_string(),
            cache_hit,
            attempts,
            elapsed_ms,
        })
        .await;
        self.events.emit(GenerationEvent::StageCompleted {
            run_id: run.run_id(),
            stage: kind.label().to_string(),
            cache_hit,
            attempts,
            elapsed_ms,
            timestamp: Utc::now(),
        });
        info!(run_id = %run.run_id(), stage = %kind, cache_hit, attempts, elapsed_ms, "Stage completed");
    }
}

/// Run CPU-bound stage work on the blocking pool
///
/// A stage timeout abandons the join handle; the computation itself runs to
/// completion and its result is discarded.
async fn run_blocking<T, F>(work: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, StageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StageError::Internal(format!("stage task failed: {}", e)))?
}

fn internal_failure(kind: StageKind, err: GraphError) -> PipelineError {
    PipelineError::new(
        kind,
        Fingerprint::builder().field(kind.label()).finish(),
        0,
        StageError::Internal(err.to_string()),
    )
}

fn graph_failure(request: &PipelineRequest, err: GraphError) -> PipelineError {
    let stage = match &err {
        GraphError::DuplicateStage(stage)
        | GraphError::UnknownStage(stage)
        | GraphError::MissingUpstream { stage, .. }
        | GraphError::Config { stage, .. } => *stage,
    };
    PipelineError::new(stage, request.fingerprint(), 0, StageError::Internal(err.to_string()))
}
