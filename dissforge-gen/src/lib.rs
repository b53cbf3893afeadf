//! dissforge-gen library interface
//!
//! Turns a Reddit post into a mastered diss track: stage adapters around the
//! external services, the beat-synchronization audio engine, and the
//! orchestrator that sequences, caches and retries the stages.

pub mod adapters;
pub mod api;
pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use dissforge_common::events::EventBus;
use pipeline::Orchestrator;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let event_bus = orchestrator.events().clone();
        Self {
            orchestrator,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::generate_routes())
        .merge(api::run_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
