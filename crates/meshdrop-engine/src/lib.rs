pub mod cancel;
pub mod client;
pub mod config;
pub mod handoff;
pub mod pipeline;
pub mod store;
#[cfg(test)]
mod testing;
pub mod transport;

pub use cancel::{CancellationToken, SleepOutcome, Sleeper, ThreadSleeper};
pub use client::{JobClient, PollSession};
pub use config::{ConfigError, MeshdropConfig, PlacementConfig, ServiceConfig, ServiceTimings};
pub use handoff::{
    ArtifactHandoff, ArtifactRenderer, HandoffOutcome, HandoffResult, PlaceholderSpawner,
    RendererError,
};
pub use pipeline::{receipt_path_for, PipelineOutcome, ReconstructionPipeline};
pub use store::ArtifactStore;
pub use transport::{HttpReply, HttpTransport, MultipartBody, Transport};

/// Session identifier used to key event logs, e.g. `session-20250101T120000-1a2b3c4d`.
pub fn new_session_id() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session-{stamp}-{}", &suffix[..8])
}
