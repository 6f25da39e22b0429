use std::time::Duration;

use meshdrop_contracts::jobs::{
    decode_job_creation, decode_job_status, diagnostic_body, encode_upload_options, DecodeError,
    JobError, JobStatus, JobStatusUpdate, PollFailure, ReconstructionJob, UploadBatch,
};
use meshdrop_contracts::status::{StatusSink, StatusUpdate};
use url::Url;

use crate::cancel::{CancellationToken, SleepOutcome, Sleeper, ThreadSleeper};
use crate::config::{ConfigError, ServiceConfig, ServiceTimings};
use crate::transport::{MultipartBody, Transport};

pub const IMAGE_FIELD: &str = "files";
pub const OPTIONS_FIELD: &str = "options";

const GENERIC_FAILURE_MESSAGE: &str = "reconstruction failed without an error message";

/// Bookkeeping for one poll loop. `elapsed` counts slept intervals, not wall time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSession {
    pub job_id: String,
    pub elapsed: Duration,
    pub deadline: Duration,
    pub interval: Duration,
    pub polls: u32,
}

impl PollSession {
    pub fn new(job_id: impl Into<String>, interval: Duration, deadline: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            elapsed: Duration::ZERO,
            deadline,
            interval,
            polls: 0,
        }
    }

    /// Whether another interval can pass before the deadline is reached.
    pub fn has_time_for_next_tick(&self) -> bool {
        self.elapsed.saturating_add(self.interval) < self.deadline
    }

    pub fn record_sleep(&mut self) {
        self.elapsed = self.elapsed.saturating_add(self.interval);
    }
}

/// Drives one reconstruction job: create, poll until terminal, download.
pub struct JobClient<T, S = ThreadSleeper> {
    transport: T,
    sleeper: S,
    config: ServiceConfig,
    timings: ServiceTimings,
    jobs_url: Url,
    cancel: CancellationToken,
}

impl<T: Transport> JobClient<T, ThreadSleeper> {
    pub fn new(transport: T, config: ServiceConfig) -> Result<Self, ConfigError> {
        Self::with_sleeper(transport, ThreadSleeper, config)
    }
}

impl<T: Transport, S: Sleeper> JobClient<T, S> {
    pub fn with_sleeper(transport: T, sleeper: S, config: ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let timings = config.timings()?;
        let endpoint = format!("{}/api/v1/jobs", config.base_url());
        let jobs_url = Url::parse(&endpoint).map_err(|err| ConfigError::InvalidBaseUrl {
            url: config.base_url().to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            transport,
            sleeper,
            config,
            timings,
            jobs_url,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn job_url(&self, job_id: &str) -> String {
        self.job_url_with(job_id, None)
    }

    pub fn artifact_url(&self, job_id: &str) -> String {
        self.job_url_with(job_id, Some("artifact"))
    }

    fn job_url_with(&self, job_id: &str, suffix: Option<&str>) -> String {
        let mut url = self.jobs_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(job_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        url.to_string()
    }

    fn headers(&self, accept: &str) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.config.api_key.trim()),
            ),
            ("Accept".to_string(), accept.to_string()),
        ]
    }

    /// Uploads the batch. Only HTTP 201 counts as success.
    pub fn create_job(
        &self,
        batch: UploadBatch,
        sink: &dyn StatusSink,
    ) -> Result<ReconstructionJob, JobError> {
        self.ensure_active(sink)?;
        sink.report(StatusUpdate::Submitting {
            images: batch.len(),
            bytes: batch.total_bytes(),
        });

        let (images, options) = batch.into_parts();
        let mut body = MultipartBody::new();
        for image in images {
            body = body.file(IMAGE_FIELD, image.filename, image.content_type, image.bytes);
        }
        body = body.text(OPTIONS_FIELD, encode_upload_options(&options));

        let reply = match self.transport.post(
            self.jobs_url.as_str(),
            &self.headers("application/json"),
            body,
            self.timings.upload_timeout,
        ) {
            Ok(reply) => reply,
            Err(err) => return fail(sink, JobError::Transport(err)),
        };
        if reply.status != 201 {
            return fail(
                sink,
                JobError::JobCreation {
                    status: reply.status,
                    body: diagnostic_body(&reply.body),
                },
            );
        }
        let job = match decode_job_creation(&reply.body) {
            Ok(job) => job,
            Err(err) => return fail(sink, JobError::Decode(err)),
        };
        sink.report(StatusUpdate::JobCreated {
            job_id: job.job_id.clone(),
        });
        Ok(job)
    }

    /// Polls `job_id` until it completes, fails, or runs out of time.
    pub fn await_completion(
        &self,
        job_id: &str,
        sink: &dyn StatusSink,
    ) -> Result<ReconstructionJob, JobError> {
        self.track(ReconstructionJob::new(job_id, JobStatus::Pending), sink)
    }

    /// Same as [`JobClient::await_completion`], starting from the record `create_job` returned.
    pub fn track(
        &self,
        mut job: ReconstructionJob,
        sink: &dyn StatusSink,
    ) -> Result<ReconstructionJob, JobError> {
        if job.is_terminal() {
            return self.finish(job, sink);
        }
        let mut session = PollSession::new(
            job.job_id.clone(),
            self.timings.poll_interval,
            self.timings.max_wait_time,
        );

        loop {
            self.ensure_active(sink)?;
            session.polls += 1;
            let update = match self.poll_once(&session.job_id) {
                Ok(update) => update,
                Err(source) => {
                    return fail(
                        sink,
                        JobError::Poll {
                            job_id: session.job_id.clone(),
                            source,
                        },
                    )
                }
            };
            // Only non-terminal records reach this point, so the transition is always accepted.
            let _ = job.apply(&update);
            if job.is_terminal() {
                return self.finish(job, sink);
            }

            sink.report(StatusUpdate::Progress {
                job_id: job.job_id.clone(),
                stage: job.stage_label().to_string(),
                progress: job.progress,
            });
            if !session.has_time_for_next_tick() {
                return fail(
                    sink,
                    JobError::JobTimeout {
                        job_id: session.job_id.clone(),
                        waited: session.elapsed,
                        last: Box::new(job),
                    },
                );
            }
            if self.sleeper.sleep(session.interval, &self.cancel) == SleepOutcome::Cancelled {
                return fail(sink, JobError::Cancelled);
            }
            session.record_sleep();
        }
    }

    /// One status request. Any failure here ends the whole poll loop.
    pub fn poll_once(&self, job_id: &str) -> Result<JobStatusUpdate, PollFailure> {
        let reply = self.transport.get(
            &self.job_url(job_id),
            &self.headers("application/json"),
            self.timings.status_timeout,
        )?;
        if reply.status != 200 {
            return Err(PollFailure::Status {
                status: reply.status,
                body: diagnostic_body(&reply.body),
            });
        }
        let update = decode_job_status(&reply.body)?;
        if let Some(reported) = update.job_id.as_deref() {
            if reported != job_id {
                return Err(PollFailure::Decode(DecodeError::malformed(
                    "job status",
                    format!("response is for job '{reported}', expected '{job_id}'"),
                    &reply.body,
                )));
            }
        }
        Ok(update)
    }

    /// Fetches the finished model. Only HTTP 200 counts as success.
    pub fn download_artifact(&self, job_id: &str, sink: &dyn StatusSink) -> Result<Vec<u8>, JobError> {
        self.ensure_active(sink)?;
        sink.report(StatusUpdate::Downloading {
            job_id: job_id.to_string(),
        });
        let reply = match self.transport.get(
            &self.artifact_url(job_id),
            &self.headers("application/octet-stream"),
            self.timings.download_timeout,
        ) {
            Ok(reply) => reply,
            Err(err) => {
                return fail(
                    sink,
                    JobError::Download {
                        job_id: job_id.to_string(),
                        status: None,
                        message: err.to_string(),
                    },
                )
            }
        };
        if reply.status != 200 {
            return fail(
                sink,
                JobError::Download {
                    job_id: job_id.to_string(),
                    status: Some(reply.status),
                    message: format!("HTTP {}: {}", reply.status, diagnostic_body(&reply.body)),
                },
            );
        }
        self.ensure_active(sink)?;
        sink.report(StatusUpdate::Downloaded {
            job_id: job_id.to_string(),
            bytes: reply.body.len(),
        });
        Ok(reply.body)
    }

    fn finish(
        &self,
        job: ReconstructionJob,
        sink: &dyn StatusSink,
    ) -> Result<ReconstructionJob, JobError> {
        match job.status {
            JobStatus::Failed => {
                let message = job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
                fail(
                    sink,
                    JobError::JobFailed {
                        job_id: job.job_id,
                        message,
                    },
                )
            }
            _ => {
                sink.report(StatusUpdate::JobCompleted {
                    job_id: job.job_id.clone(),
                });
                Ok(job)
            }
        }
    }

    fn ensure_active(&self, sink: &dyn StatusSink) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return fail(sink, JobError::Cancelled);
        }
        Ok(())
    }
}

/// Reports a fatal error to the sink exactly once and hands it back to the caller.
pub(crate) fn fail<T>(sink: &dyn StatusSink, err: JobError) -> Result<T, JobError> {
    sink.report(StatusUpdate::Failed {
        kind: err.kind(),
        message: err.to_string(),
    });
    Err(err)
}
