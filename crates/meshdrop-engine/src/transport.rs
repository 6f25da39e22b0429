use std::time::Duration;

use meshdrop_contracts::jobs::{TransportError, TransportErrorKind};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};

pub type Headers = [(String, String)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    File {
        field: String,
        filename: String,
        content_type: String,
        bytes: Vec<u8>,
    },
    Text {
        field: String,
        value: String,
    },
}

impl FormPart {
    pub fn field(&self) -> &str {
        match self {
            Self::File { field, .. } | Self::Text { field, .. } => field,
        }
    }
}

/// Multipart body independent of any HTTP library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    parts: Vec<FormPart>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(
        mut self,
        field: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FormPart::File {
            field: field.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        });
        self
    }

    pub fn text(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }
}

/// Moves bytes. Never looks at what the body means.
pub trait Transport {
    fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: MultipartBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;

    fn get(&self, url: &str, headers: &Headers, timeout: Duration)
        -> Result<HttpReply, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: MultipartBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        (**self).post(url, headers, body, timeout)
    }

    fn get(
        &self,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        (**self).get(url, headers, timeout)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }

    fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        let mut request = request.timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .map_err(|err| classify_reqwest_error(operation, &err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| classify_reqwest_error(operation, &err))?
            .to_vec();
        Ok(HttpReply { status, body })
    }
}

impl Transport for HttpTransport {
    fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: MultipartBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        let operation = format!("POST {url}");
        let mut form = MultipartForm::new();
        for part in body.parts {
            form = match part {
                FormPart::Text { field, value } => form.text(field, value),
                FormPart::File {
                    field,
                    filename,
                    content_type,
                    bytes,
                } => {
                    let part = MultipartPart::bytes(bytes)
                        .file_name(filename)
                        .mime_str(&content_type)
                        .map_err(|err| {
                            TransportError::new(
                                TransportErrorKind::Request,
                                operation.as_str(),
                                format!("invalid content type '{content_type}': {err}"),
                            )
                        })?;
                    form.part(field, part)
                }
            };
        }
        self.send(
            &operation,
            self.http.post(url).multipart(form),
            headers,
            timeout,
        )
    }

    fn get(
        &self,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        let operation = format!("GET {url}");
        self.send(&operation, self.http.get(url), headers, timeout)
    }
}

fn classify_reqwest_error(operation: &str, err: &reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Request
    };
    TransportError::new(kind, operation, error_chain_text(err))
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(|last| last != trimmed).unwrap_or(true) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    parts.join(" | caused by: ")
}
