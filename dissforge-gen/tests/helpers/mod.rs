//! Shared helpers for dissforge-gen integration tests

#![allow(dead_code)]

pub mod audio_generator;
pub mod fakes;

use audio_generator::TEST_SAMPLE_RATE;
use dissforge_common::events::EventBus;
use dissforge_gen::adapters::Adapters;
use dissforge_gen::config::{GeneratorConfig, StagePolicies, StagePolicy};
use dissforge_gen::models::{GenerationOptions, PipelineRequest};
use dissforge_gen::pipeline::{ArtifactStore, Orchestrator};
use fakes::FakeServices;
use std::sync::Arc;
use std::time::Duration;

pub const POST_URL: &str = "https://www.reddit.com/r/programming/comments/abc123/tabs_vs_spaces/";
pub const BEAT_ID: &str = "boom_bap.wav";

/// Fast retries, generous timeouts
pub fn test_config() -> GeneratorConfig {
    let mut config = GeneratorConfig::default();
    config.sample_rate = TEST_SAMPLE_RATE;
    config.stages = StagePolicies::uniform(StagePolicy {
        timeout_ms: 20_000,
        max_attempts: 3,
        initial_backoff_ms: 5,
        backoff_multiplier: 2.0,
        max_backoff_ms: 20,
    });
    config.beats.default_beat = Some(BEAT_ID.to_string());
    config
}

pub fn test_request() -> PipelineRequest {
    PipelineRequest::new(POST_URL, Some(BEAT_ID), GenerationOptions::default())
        .expect("valid test request")
}

pub fn in_memory_store() -> ArtifactStore {
    ArtifactStore::in_memory(64, Duration::from_secs(3600))
}

/// Orchestrator over fake services and the given store
pub fn orchestrator(services: &FakeServices, store: ArtifactStore) -> Arc<Orchestrator> {
    orchestrator_with_adapters(services.adapters(), store)
}

pub fn orchestrator_with_adapters(adapters: Adapters, store: ArtifactStore) -> Arc<Orchestrator> {
    let config = Arc::new(test_config());
    let events = EventBus::new(config.server.event_capacity);
    Arc::new(Orchestrator::new(config, adapters, store, events).expect("orchestrator builds"))
}
