//! In-memory collaborators for exercising the client without a network.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use meshdrop_contracts::jobs::{TransportError, TransportErrorKind};

use crate::cancel::{CancellationToken, SleepOutcome, Sleeper};
use crate::transport::{Headers, HttpReply, MultipartBody, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedMethod {
    Post(MultipartBody),
    Get,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: RecordedMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Replays scripted replies in order and records every request.
///
/// Running out of script yields a transport error so a runaway loop fails loudly.
#[derive(Debug, Default)]
pub struct StubTransport {
    replies: RefCell<VecDeque<Result<HttpReply, TransportError>>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.replies
            .borrow_mut()
            .push_back(Ok(HttpReply::new(status, body)));
        self
    }

    pub fn reply_json(self, status: u16, body: serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        self.reply(status, bytes)
    }

    pub fn fail(self, kind: TransportErrorKind, message: &str) -> Self {
        self.replies.borrow_mut().push_back(Err(TransportError::new(
            kind,
            "stub",
            message.to_string(),
        )));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }

    fn next_reply(&self, request: RecordedRequest) -> Result<HttpReply, TransportError> {
        let operation = format!("{} {}", method_name(&request.method), request.url);
        self.requests.borrow_mut().push(request);
        self.replies.borrow_mut().pop_front().unwrap_or_else(|| {
            Err(TransportError::new(
                TransportErrorKind::Connect,
                operation,
                "stub transport has no scripted reply left",
            ))
        })
    }
}

fn method_name(method: &RecordedMethod) -> &'static str {
    match method {
        RecordedMethod::Post(_) => "POST",
        RecordedMethod::Get => "GET",
    }
}

impl Transport for StubTransport {
    fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: MultipartBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        self.next_reply(RecordedRequest {
            method: RecordedMethod::Post(body),
            url: url.to_string(),
            headers: headers.to_vec(),
            timeout,
        })
    }

    fn get(
        &self,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        self.next_reply(RecordedRequest {
            method: RecordedMethod::Get,
            url: url.to_string(),
            headers: headers.to_vec(),
            timeout,
        })
    }
}

/// Records requested sleeps without blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: RefCell<Vec<Duration>>,
    cancel_on: Option<usize>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token during the `n`th sleep (1-based).
    pub fn cancelling_on(n: usize) -> Self {
        Self {
            sleeps: RefCell::new(Vec::new()),
            cancel_on: Some(n),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome {
        let mut sleeps = self.sleeps.borrow_mut();
        sleeps.push(duration);
        if self.cancel_on == Some(sleeps.len()) {
            cancel.cancel();
            return SleepOutcome::Cancelled;
        }
        SleepOutcome::Elapsed
    }
}
