//! Generation pipeline: stage graph, artifact store, retry and orchestration

pub mod artifact;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod retry;
pub mod runs;
pub mod stage;
pub mod store;

pub use artifact::{ArtifactPayload, StageArtifact, StageOutput};
pub use error::{PipelineError, StoreError};
pub use graph::{GraphError, StageGraph};
pub use orchestrator::{GeneratedTrack, Orchestrator};
pub use retry::retry_with_backoff;
pub use runs::{RunHandle, RunOutput, RunRegistry, CANCELLED_CAUSE};
pub use stage::StageKind;
pub use store::{ArtifactStore, Claim, ProductionSlot};
