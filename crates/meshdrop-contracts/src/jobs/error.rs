use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::model::ReconstructionJob;

const DIAGNOSTIC_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
}

/// Connectivity failure below HTTP status handling. Possibly transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub operation: String,
    pub message: String,
}

impl TransportError {
    pub fn new(
        kind: TransportErrorKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed {shape} payload: {reason} (body: {body})")]
    Malformed {
        shape: &'static str,
        reason: String,
        body: String,
    },
    #[error("unrecognized job status '{status}' (body: {body})")]
    UnknownStatus { status: String, body: String },
}

impl DecodeError {
    pub fn malformed(shape: &'static str, reason: impl Into<String>, body: &[u8]) -> Self {
        Self::Malformed {
            shape,
            reason: reason.into(),
            body: diagnostic_body(body),
        }
    }

    pub fn unknown_status(status: impl Into<String>, body: &[u8]) -> Self {
        Self::UnknownStatus {
            status: status.into(),
            body: diagnostic_body(body),
        }
    }
}

/// Why a single status tick failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("status request returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Decode,
    UnknownStatus,
    JobCreation,
    JobFailed,
    JobTimeout,
    Poll,
    Download,
    Cancelled,
    Storage,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("could not reach the reconstruction service, check the connection and retry: {0}")]
    Transport(#[source] TransportError),

    #[error(transparent)]
    Decode(DecodeError),

    #[error("job creation rejected with HTTP {status}: {body}")]
    JobCreation { status: u16, body: String },

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("job {job_id} did not finish within {:.1}s (last status {})", .waited.as_secs_f64(), .last.status)]
    JobTimeout {
        job_id: String,
        waited: Duration,
        last: Box<ReconstructionJob>,
    },

    #[error("status poll for job {job_id} failed: {source}")]
    Poll {
        job_id: String,
        #[source]
        source: PollFailure,
    },

    #[error("artifact download for job {job_id} failed: {message}")]
    Download {
        job_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to persist artifact at {}: {source}", .path.display())]
    Storage {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Decode(DecodeError::UnknownStatus { .. }) => ErrorKind::UnknownStatus,
            Self::Decode(_) => ErrorKind::Decode,
            Self::JobCreation { .. } => ErrorKind::JobCreation,
            Self::JobFailed { .. } => ErrorKind::JobFailed,
            Self::JobTimeout { .. } => ErrorKind::JobTimeout,
            Self::Poll { .. } => ErrorKind::Poll,
            Self::Download { .. } => ErrorKind::Download,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Transport failures may clear up on their own; everything else needs a new job or a fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Poll { source, .. } => matches!(source, PollFailure::Transport(_)),
            _ => false,
        }
    }

    pub fn storage(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<DecodeError> for JobError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<TransportError> for JobError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Body text safe to carry in an error: lossy UTF-8, truncated.
pub fn diagnostic_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.chars().count() <= DIAGNOSTIC_BODY_MAX_CHARS {
        return trimmed.to_string();
    }
    trimmed
        .chars()
        .take(DIAGNOSTIC_BODY_MAX_CHARS)
        .collect::<String>()
        + "…"
}
