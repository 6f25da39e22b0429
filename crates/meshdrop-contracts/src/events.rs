use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::StatusUpdate;

/// One line of a session's `events.jsonl`.
///
/// `seq` counts up from 1 within a session so interleaved jobs can be replayed in order.
/// Updates that belong to a job carry its id at the top level; `detail` holds the
/// update-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub ts: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to append to event log {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {event_type} event: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("event log {} is poisoned by a panicked writer", .path.display())]
    Poisoned { path: PathBuf },
}

/// Append-only log of the status updates seen by one session.
///
/// Clones share the file and the sequence counter.
#[derive(Debug, Clone)]
pub struct JobEventLog {
    inner: Arc<JobEventLogInner>,
}

#[derive(Debug)]
struct JobEventLogInner {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl JobEventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JobEventLogInner {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Appends `update` as one compact JSON line and returns the record written.
    ///
    /// A failed write does not consume a sequence number.
    pub fn record(&self, update: &StatusUpdate) -> Result<JobEvent, EventLogError> {
        let path = &self.inner.path;
        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| EventLogError::Poisoned { path: path.clone() })?;

        let event = JobEvent {
            event_type: update.event_type().to_string(),
            session_id: self.inner.session_id.clone(),
            seq: *next_seq,
            job_id: update.job_id().map(str::to_string),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            message: update.message(),
            detail: update.detail(),
        };
        let line = serde_json::to_string(&event).map_err(|source| EventLogError::Encode {
            event_type: update.event_type(),
            source,
        })?;
        append_line(path, &line).map_err(|source| EventLogError::Io {
            path: path.clone(),
            source,
        })?;

        *next_seq += 1;
        Ok(event)
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")
}
