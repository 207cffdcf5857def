// Operation results: the one envelope every public operation hands back.
//
// A call either produces a `Success` (message + payload) or a `Failure`
// describing which operation failed and why. Transport errors, non-2xx
// responses and local filesystem problems are all folded into `Failure`
// here so callers never have to look at `reqwest::Error` themselves.

use crate::config::Mode;
use reqwest::blocking::Response;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a single remote operation.
pub type OperationResult = Result<Success, Failure>;

/// Successful operation: a human readable message plus whatever the
/// server (or the local write) produced.
#[derive(Debug)]
pub struct Success {
    pub message: String,
    pub data: Payload,
}

impl Success {
    pub fn new(message: impl Into<String>, data: Payload) -> Self {
        Success {
            message: message.into(),
            data,
        }
    }

    /// Local file written by a download, if this success carries one.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.data {
            Payload::Saved { local_path, .. } => Some(local_path),
            _ => None,
        }
    }
}

/// Server payload attached to a `Success`.
#[derive(Debug)]
pub enum Payload {
    /// Response body, verbatim.
    Body(String),
    /// A download that was written to disk.
    Saved { local_path: PathBuf, bytes: u64 },
    /// A download left unread for the caller to consume.
    Stream(DownloadStream),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Body(text) => Some(text),
            _ => None,
        }
    }

    /// Parse the body as JSON. `None` for non-body payloads or non-JSON text.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.as_text().and_then(|t| serde_json::from_str(t).ok())
    }
}

/// Live download body. Reading from it pulls bytes off the connection;
/// dropping it releases the connection.
#[derive(Debug)]
pub struct DownloadStream {
    inner: Response,
}

impl DownloadStream {
    pub(crate) fn new(inner: Response) -> Self {
        DownloadStream { inner }
    }

    /// Length announced by the server, when it sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }
}

impl Read for DownloadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Local precondition: missing file, bad destination, write error.
    Local,
    /// Connection could not be made or broke mid-request.
    Transport,
    /// The configured timeout elapsed.
    Timeout,
    /// The server answered with a non-success status.
    Server,
}

/// Parameters of an upload attempt, attached to upload failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSnapshot {
    pub file_name: String,
    pub size: u64,
    pub remote_path: String,
    pub endpoint: String,
    pub mode: Mode,
    pub compressed: bool,
}

impl fmt::Display for UploadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes) -> {} via {} [{}{}]",
            self.file_name,
            self.size,
            self.remote_path,
            self.endpoint,
            self.mode,
            if self.compressed { ", gzip" } else { "" }
        )
    }
}

/// Failed operation.
#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct Failure {
    pub operation: &'static str,
    pub kind: FailureKind,
    /// Server supplied message when there is one, else the transport error text.
    pub message: String,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    /// Raw response body, if the server sent one.
    pub details: Option<String>,
    pub request: Option<UploadSnapshot>,
}

impl Failure {
    fn bare(operation: &'static str, kind: FailureKind, message: String) -> Self {
        Failure {
            operation,
            kind,
            message,
            status: None,
            status_text: None,
            details: None,
            request: None,
        }
    }

    /// Local precondition or local I/O failure. No network call was involved.
    pub fn local(operation: &'static str, err: impl fmt::Display) -> Self {
        Failure::bare(operation, FailureKind::Local, err.to_string())
    }

    /// Failure raised by the HTTP client itself (connect, timeout, body read).
    pub fn transport(operation: &'static str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Transport
        };
        let mut failure = Failure::bare(operation, kind, err.to_string());
        if let Some(status) = err.status() {
            failure.status = Some(status.as_u16());
            failure.status_text = status.canonical_reason().map(str::to_string);
        }
        warn!(operation, error = %err, "request did not complete");
        failure
    }

    /// Build a failure from a non-success response, consuming its body.
    pub fn from_response(operation: &'static str, response: Response) -> Self {
        let status = response.status();
        let transport_text = response.error_for_status_ref().err().map(|e| e.to_string());
        debug!(
            operation,
            status = status.as_u16(),
            headers = ?response.headers(),
            "error response headers"
        );

        let body = response.text().ok().filter(|b| !b.trim().is_empty());
        let message = body
            .as_deref()
            .and_then(server_message)
            .or(transport_text)
            .unwrap_or_else(|| format!("server responded with HTTP {}", status.as_u16()));

        warn!(
            operation,
            status = status.as_u16(),
            body = body.as_deref().unwrap_or(""),
            "server rejected request"
        );

        Failure {
            operation,
            kind: FailureKind::Server,
            message,
            status: Some(status.as_u16()),
            status_text: status.canonical_reason().map(str::to_string),
            details: body,
            request: None,
        }
    }

    pub fn with_request(mut self, snapshot: UploadSnapshot) -> Self {
        self.request = Some(snapshot);
        self
    }
}

/// Turn a response into an `OperationResult`, keeping the body verbatim.
pub(crate) fn complete(
    operation: &'static str,
    message: impl Into<String>,
    response: Response,
) -> OperationResult {
    if !response.status().is_success() {
        return Err(Failure::from_response(operation, response));
    }
    let body = response
        .text()
        .map_err(|e| Failure::transport(operation, &e))?;
    Ok(Success::new(message, Payload::Body(body)))
}

/// Pull a `message` (or `error`) string out of a JSON error body.
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .filter_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}
