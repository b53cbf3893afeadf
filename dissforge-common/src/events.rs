//! Generation events and the broadcast `EventBus`
//!
//! Events identify runs by `run_id` only. Artifact fingerprints are internal
//! cache keys and never appear in events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Events emitted while a generation run progresses
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GenerationEvent {
    /// A run was accepted
    GenerationStarted {
        run_id: Uuid,
        source_url: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage began (cache lookup included)
    StageStarted {
        run_id: Uuid,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage attempt failed with a transient cause and will be retried
    StageRetrying {
        run_id: Uuid,
        stage: String,
        attempt: u32,
        backoff_ms: u64,
        cause: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage produced (or found in cache) its artifact
    StageCompleted {
        run_id: Uuid,
        stage: String,
        cache_hit: bool,
        attempts: u32,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The run finished with a mastered track
    GenerationCompleted {
        run_id: Uuid,
        duration_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// The run ended in the failed state
    GenerationFailed {
        run_id: Uuid,
        stage: String,
        cause: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl GenerationEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            GenerationEvent::GenerationStarted { .. } => "GenerationStarted",
            GenerationEvent::StageStarted { .. } => "StageStarted",
            GenerationEvent::StageRetrying { .. } => "StageRetrying",
            GenerationEvent::StageCompleted { .. } => "StageCompleted",
            GenerationEvent::GenerationCompleted { .. } => "GenerationCompleted",
            GenerationEvent::GenerationFailed { .. } => "GenerationFailed",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            GenerationEvent::GenerationStarted { run_id, .. }
            | GenerationEvent::StageStarted { run_id, .. }
            | GenerationEvent::StageRetrying { run_id, .. }
            | GenerationEvent::StageCompleted { run_id, .. }
            | GenerationEvent::GenerationCompleted { run_id, .. }
            | GenerationEvent::GenerationFailed { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for [`GenerationEvent`]s
///
/// Cheap to clone; all clones share one channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GenerationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers that received it
    ///
    /// Having no subscribers is normal (no SSE client connected) and is not
    /// an error.
    pub fn emit(&self, event: GenerationEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                debug!(event_type = event.event_type(), "No subscribers for event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run_id: Uuid) -> GenerationEvent {
        GenerationEvent::GenerationStarted {
            run_id,
            source_url: "https://www.reddit.com/r/test/comments/abc/x/".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        assert_eq!(bus.emit(started(run_id)), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
        assert_eq!(event.event_type(), "GenerationStarted");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.emit(started(Uuid::new_v4())), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let event = GenerationEvent::StageCompleted {
            run_id: Uuid::new_v4(),
            stage: "scrape".to_string(),
            cache_hit: true,
            attempts: 0,
            elapsed_ms: 3,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StageCompleted");
        assert_eq!(json["stage"], "scrape");
        assert_eq!(json["cache_hit"], true);
    }
}
