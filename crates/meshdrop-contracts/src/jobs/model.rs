use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placement::ServerPose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Parses a wire status. Unknown values return `None` and must never be coerced.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One decoded status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub placement: Option<ServerPose>,
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            job_id: None,
            status,
            progress: None,
            stage: None,
            message: None,
            error: None,
            placement: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job is already {from} and cannot move to {to}")]
pub struct TransitionRejected {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionJob {
    pub job_id: String,
    pub task_id: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub error_message: Option<String>,
    pub placement: Option<ServerPose>,
}

impl ReconstructionJob {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: None,
            status,
            progress: 0.0,
            stage: None,
            message: None,
            error_message: None,
            placement: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Folds a poll response into the job.
    ///
    /// Terminal jobs are frozen: any further update is rejected and leaves the record untouched.
    /// Progress is taken as reported; the service does not promise it only grows.
    pub fn apply(&mut self, update: &JobStatusUpdate) -> Result<(), TransitionRejected> {
        if self.status.is_terminal() {
            return Err(TransitionRejected {
                from: self.status,
                to: update.status,
            });
        }
        self.status = update.status;
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if update.status == JobStatus::Completed {
            self.progress = 1.0;
        }
        if update.stage.is_some() {
            self.stage = update.stage.clone();
        }
        if update.message.is_some() {
            self.message = update.message.clone();
        }
        if update.status == JobStatus::Failed {
            self.error_message = update.error.clone().or_else(|| update.message.clone());
        }
        if update.placement.is_some() {
            self.placement = update.placement.clone();
        }
        Ok(())
    }

    /// Human label for the job's current phase.
    pub fn stage_label(&self) -> &str {
        self.stage
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.status.as_wire())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

impl ImageUpload {
    pub fn new(
        bytes: Vec<u8>,
        content_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            filename: filename.into(),
        }
    }

    pub fn jpeg(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self::new(bytes, "image/jpeg", filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub resolution_level: i64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            resolution_level: 2,
        }
    }
}

/// Images submitted together for one job. Never empty; consumed on submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    images: Vec<ImageUpload>,
    options: UploadOptions,
}

impl UploadBatch {
    pub fn new(images: Vec<ImageUpload>, options: UploadOptions) -> Result<Self, EmptyBatch> {
        if images.is_empty() {
            return Err(EmptyBatch);
        }
        Ok(Self { images, options })
    }

    pub fn images(&self) -> &[ImageUpload] {
        &self.images
    }

    pub fn options(&self) -> UploadOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.images.iter().map(|image| image.bytes.len()).sum()
    }

    pub fn into_parts(self) -> (Vec<ImageUpload>, UploadOptions) {
        (self.images, self.options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("an upload batch needs at least one image")]
pub struct EmptyBatch;
