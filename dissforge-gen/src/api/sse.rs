//! Server-Sent Events stream of generation events

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /events
///
/// Streams GenerationStarted, StageStarted, StageRetrying, StageCompleted,
/// GenerationCompleted and GenerationFailed, with a comment heartbeat every
/// 15 seconds.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            let event_type = event.event_type();
                            match serde_json::to_string(&event) {
                                Ok(json) => yield Ok(Event::default().event(event_type).data(json)),
                                Err(e) => warn!("SSE: Failed to serialize event {}: {}", event_type, e),
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "SSE: Client lagging, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("heartbeat"))
}
