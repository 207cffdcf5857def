// Upload pipeline.
//
// A local file is streamed (optionally through gzip) into a multipart
// request. Nothing is buffered in full: reqwest pulls from the reader as it
// writes the body. The field layout of the form depends on the deployment
// and is supplied by the backend as an `UploadLayout`.

use super::executor::{Auth, RequestExecutor};
use super::result::{self, Failure, OperationResult, UploadSnapshot};
use crate::config::Mode;
use flate2::read::GzEncoder;
use flate2::Compression;
use reqwest::blocking::multipart::{Form, Part};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const OPERATION: &str = "upload";

/// Assumed transfer rate used to size the upload timeout (10 MiB/s).
pub const BASELINE_RATE: u64 = 10 * 1024 * 1024;
const TIMEOUT_FLOOR_MS: u64 = 60_000;
/// No upload gets less than five minutes.
pub const MIN_UPLOAD_TIMEOUT: Duration = Duration::from_millis(300_000);

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Timeout for uploading `size` bytes: twice the estimated transfer time
/// plus a minute, never below `MIN_UPLOAD_TIMEOUT`.
pub fn upload_timeout(size: u64) -> Duration {
    let estimate_ms = size.saturating_mul(1000) / BASELINE_RATE;
    let ms = estimate_ms
        .saturating_mul(2)
        .saturating_add(TIMEOUT_FLOOR_MS)
        .max(MIN_UPLOAD_TIMEOUT.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Bytes sent so far. `total` is unknown for compressed uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.transferred as f64 * 100.0 / total as f64),
            None => None,
        }
    }
}

impl fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent() {
            Some(pct) => write!(f, "{pct:.1}%"),
            None => write!(f, "{} bytes", self.transferred),
        }
    }
}

/// Progress callback. Runs on whichever thread drives the request body.
pub type ProgressFn = Box<dyn FnMut(TransferProgress) + Send>;

#[derive(Default)]
pub struct UploadOptions {
    pub compress: bool,
    pub progress: Option<ProgressFn>,
}

impl UploadOptions {
    pub fn compressed() -> Self {
        UploadOptions {
            compress: true,
            progress: None,
        }
    }

    pub fn with_progress(
        mut self,
        progress: impl FnMut(TransferProgress) + Send + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("compress", &self.compress)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Where and how a deployment expects the multipart form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLayout {
    pub endpoint: &'static str,
    pub path_field: &'static str,
    pub file_field: &'static str,
    pub extra_fields: &'static [(&'static str, &'static str)],
}

/// A local file that has been opened and measured, ready to send.
pub struct PreparedUpload {
    file: File,
    file_name: String,
    size: u64,
    remote_path: String,
    options: UploadOptions,
}

impl PreparedUpload {
    /// Open and stat the local file. Fails before any network traffic when
    /// the file is missing or not a regular file.
    pub fn open(
        local_path: &Path,
        remote_path: &str,
        options: UploadOptions,
    ) -> Result<Self, Failure> {
        let local_error = |e: io::Error| {
            Failure::local(OPERATION, format!("cannot read {}: {e}", local_path.display()))
        };
        let file = File::open(local_path).map_err(local_error)?;
        let meta = file.metadata().map_err(local_error)?;
        if !meta.is_file() {
            return Err(Failure::local(
                OPERATION,
                format!("{} is not a regular file", local_path.display()),
            ));
        }
        let base_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Failure::local(
                    OPERATION,
                    format!("{} has no usable file name", local_path.display()),
                )
            })?;
        let file_name = if options.compress {
            format!("{base_name}.gz")
        } else {
            base_name.to_string()
        };
        Ok(PreparedUpload {
            file,
            file_name,
            size: meta.len(),
            remote_path: remote_path.to_string(),
            options,
        })
    }

    /// Name the file part will carry (with `.gz` when compressed).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Uncompressed size on disk.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_compressed(&self) -> bool {
        self.options.compress
    }

    fn snapshot(
        &self,
        executor: &RequestExecutor,
        layout: &UploadLayout,
        mode: Mode,
    ) -> UploadSnapshot {
        UploadSnapshot {
            file_name: self.file_name.clone(),
            size: self.size,
            remote_path: self.remote_path.clone(),
            endpoint: executor.url(layout.endpoint),
            mode,
            compressed: self.options.compress,
        }
    }

    /// Build the multipart form. Uncompressed parts declare their exact
    /// length; gzip output length is unknown so the request is chunked.
    fn into_form(self, layout: &UploadLayout) -> reqwest::Result<Form> {
        let PreparedUpload {
            file,
            file_name,
            size,
            remote_path,
            options,
        } = self;

        let part = if options.compress {
            let encoder = GzEncoder::new(file, Compression::default());
            Part::reader(ProgressReader::new(encoder, None, options.progress))
                .mime_str("application/gzip")?
        } else {
            Part::reader_with_length(ProgressReader::new(file, Some(size), options.progress), size)
                .mime_str("application/octet-stream")?
        };

        let mut form = Form::new().text(layout.path_field, remote_path);
        for (name, value) in layout.extra_fields {
            form = form.text(*name, *value);
        }
        Ok(form.part(layout.file_field, part.file_name(file_name)))
    }
}

/// Send a prepared upload using `layout`.
pub(crate) fn send(
    executor: &RequestExecutor,
    auth: &Auth,
    mode: Mode,
    layout: UploadLayout,
    upload: PreparedUpload,
) -> OperationResult {
    let snapshot = upload.snapshot(executor, &layout, mode);
    let timeout = upload_timeout(upload.size);
    debug!(request = %snapshot, timeout_ms = timeout.as_millis() as u64, "starting upload");

    let transport =
        |e: reqwest::Error| Failure::transport(OPERATION, &e).with_request(snapshot.clone());

    let form = upload.into_form(&layout).map_err(transport)?;
    let client = executor
        .client(Some(timeout), executor.follow_upload_redirects())
        .map_err(transport)?;
    let response = auth
        .apply(executor.post(&client, layout.endpoint))
        .multipart(form)
        .send()
        .map_err(transport)?;

    let message = format!("Uploaded {} to {}", snapshot.file_name, snapshot.remote_path);
    match result::complete(OPERATION, message, response) {
        Ok(success) => {
            info!(file = %snapshot.file_name, remote = %snapshot.remote_path, "upload complete");
            Ok(success)
        }
        Err(failure) => {
            debug!(request = %snapshot, "upload rejected");
            Err(failure.with_request(snapshot))
        }
    }
}

/// Reader adapter that counts bytes and samples them into a callback.
struct ProgressReader<R> {
    inner: R,
    transferred: u64,
    total: Option<u64>,
    last_report: Instant,
    finished: bool,
    progress: Option<ProgressFn>,
}

impl<R: Read> ProgressReader<R> {
    fn new(inner: R, total: Option<u64>, progress: Option<ProgressFn>) -> Self {
        ProgressReader {
            inner,
            transferred: 0,
            total,
            last_report: Instant::now(),
            finished: false,
            progress,
        }
    }

    fn report(&mut self) {
        if let Some(cb) = self.progress.as_mut() {
            cb(TransferProgress {
                transferred: self.transferred,
                total: self.total,
            });
        }
        self.last_report = Instant::now();
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.transferred += n as u64;
        if n == 0 {
            if !self.finished {
                self.finished = true;
                self.report();
            }
        } else if self.last_report.elapsed() >= PROGRESS_INTERVAL {
            self.report();
        }
        Ok(n)
    }
}
