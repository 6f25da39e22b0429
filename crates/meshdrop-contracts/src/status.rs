//! Progress reporting toward whoever drives the session (UI, CLI, tests).

use std::cell::RefCell;

use serde_json::{json, Map, Value};

use crate::events::JobEventLog;
use crate::jobs::ErrorKind;
use crate::placement::PoseSource;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Submitting {
        images: usize,
        bytes: usize,
    },
    JobCreated {
        job_id: String,
    },
    Progress {
        job_id: String,
        stage: String,
        progress: f64,
    },
    JobCompleted {
        job_id: String,
    },
    Downloading {
        job_id: String,
    },
    Downloaded {
        job_id: String,
        bytes: usize,
    },
    ArtifactPersisted {
        job_id: String,
        path: String,
    },
    Spawned {
        job_id: String,
        source: PoseSource,
    },
    PlaceholderSpawned {
        job_id: String,
        reason: String,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl StatusUpdate {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Submitting { .. } => "job_submitting",
            Self::JobCreated { .. } => "job_created",
            Self::Progress { .. } => "job_progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::Downloading { .. } => "artifact_downloading",
            Self::Downloaded { .. } => "artifact_downloaded",
            Self::ArtifactPersisted { .. } => "artifact_persisted",
            Self::Spawned { .. } => "model_spawned",
            Self::PlaceholderSpawned { .. } => "placeholder_spawned",
            Self::Failed { .. } => "job_failed",
        }
    }

    /// Human-readable line for a status label.
    pub fn message(&self) -> String {
        match self {
            Self::Submitting { images, bytes } => {
                format!("Uploading {images} image(s) ({:.1} MB)...", *bytes as f64 / 1_048_576.0)
            }
            Self::JobCreated { job_id } => format!("Job {job_id} created, waiting for processing..."),
            Self::Progress {
                stage, progress, ..
            } => format!("{stage}: {:.0}%", progress * 100.0),
            Self::JobCompleted { job_id } => format!("Job {job_id} completed."),
            Self::Downloading { .. } => "Downloading model...".to_string(),
            Self::Downloaded { bytes, .. } => format!("Downloaded {bytes} bytes."),
            Self::ArtifactPersisted { path, .. } => format!("Saved model to {path}."),
            Self::Spawned { .. } => "Model placed in scene.".to_string(),
            Self::PlaceholderSpawned { reason, .. } => {
                format!("Model could not be displayed ({reason}); placed a placeholder instead.")
            }
            Self::Failed { message, .. } => format!("Error: {message}"),
        }
    }

    /// Job the update belongs to. Session-level updates have none.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Submitting { .. } | Self::Failed { .. } => None,
            Self::JobCreated { job_id }
            | Self::Progress { job_id, .. }
            | Self::JobCompleted { job_id }
            | Self::Downloading { job_id }
            | Self::Downloaded { job_id, .. }
            | Self::ArtifactPersisted { job_id, .. }
            | Self::Spawned { job_id, .. }
            | Self::PlaceholderSpawned { job_id, .. } => Some(job_id),
        }
    }

    /// Update-specific fields, without the job id.
    pub fn detail(&self) -> Map<String, Value> {
        let value = match self {
            Self::Submitting { images, bytes } => json!({"images": images, "bytes": bytes}),
            Self::JobCreated { .. } | Self::JobCompleted { .. } | Self::Downloading { .. } => {
                return Map::new()
            }
            Self::Progress {
                stage, progress, ..
            } => json!({"stage": stage, "progress": progress}),
            Self::Downloaded { bytes, .. } => json!({"bytes": bytes}),
            Self::ArtifactPersisted { path, .. } => json!({"path": path}),
            Self::Spawned { source, .. } => json!({"source": source}),
            Self::PlaceholderSpawned { reason, .. } => json!({"reason": reason}),
            Self::Failed { kind, message } => json!({"kind": kind, "error": message}),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

pub trait StatusSink {
    fn report(&self, update: StatusUpdate);
}

impl<S: StatusSink + ?Sized> StatusSink for &S {
    fn report(&self, update: StatusUpdate) {
        (**self).report(update)
    }
}

/// Mirrors status updates into `events.jsonl`.
#[derive(Debug, Clone)]
pub struct EventSink {
    log: JobEventLog,
}

impl EventSink {
    pub fn new(log: JobEventLog) -> Self {
        Self { log }
    }
}

impl StatusSink for EventSink {
    fn report(&self, update: StatusUpdate) {
        if let Err(err) = self.log.record(&update) {
            eprintln!("meshdrop: dropped {} event: {err}", update.event_type());
        }
    }
}

pub struct FanoutSink<'a> {
    sinks: Vec<&'a dyn StatusSink>,
}

impl<'a> FanoutSink<'a> {
    pub fn new(sinks: Vec<&'a dyn StatusSink>) -> Self {
        Self { sinks }
    }
}

impl StatusSink for FanoutSink<'_> {
    fn report(&self, update: StatusUpdate) {
        for sink in &self.sinks {
            sink.report(update.clone());
        }
    }
}

/// Keeps every update in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    updates: RefCell<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.borrow().clone()
    }

    pub fn failures(&self) -> Vec<(ErrorKind, String)> {
        self.updates
            .borrow()
            .iter()
            .filter_map(|update| match update {
                StatusUpdate::Failed { kind, message } => Some((*kind, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<(String, f64)> {
        self.updates
            .borrow()
            .iter()
            .filter_map(|update| match update {
                StatusUpdate::Progress {
                    stage, progress, ..
                } => Some((stage.clone(), *progress)),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn report(&self, update: StatusUpdate) {
        self.updates.borrow_mut().push(update);
    }
}
