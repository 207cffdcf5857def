// API client: the operations the CLI can perform against the file
// transfer server.
//
// `MftClient` is the single entry point. It owns a request executor and a
// deployment backend chosen from the environment; every method returns an
// `OperationResult`. The outer `Result` only fails when a session cannot be
// established, which leaves nothing else worth attempting.

pub mod backend;
mod download;
pub mod executor;
pub mod result;
pub mod session;
pub mod upload;

pub use backend::Backend;
pub use executor::{Auth, RequestExecutor};
pub use result::{
    DownloadStream, Failure, FailureKind, OperationResult, Payload, Success, UploadSnapshot,
};
pub use session::{SessionError, SessionManager};
pub use upload::{upload_timeout, TransferProgress, UploadOptions};

use crate::config::{Environment, Mode};
use std::path::Path;
use upload::PreparedUpload;

/// Client for one configured environment.
pub struct MftClient {
    env: Environment,
    executor: RequestExecutor,
    backend: Box<dyn Backend>,
}

impl MftClient {
    /// Build a client; the backend is picked from the environment's host.
    pub fn new(env: Environment) -> Self {
        let backend = backend::for_environment(&env);
        MftClient::with_backend(env, backend)
    }

    /// Build a client around an explicit backend.
    pub fn with_backend(env: Environment, backend: Box<dyn Backend>) -> Self {
        let executor = RequestExecutor::new(&env);
        MftClient {
            env,
            executor,
            backend,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn mode(&self) -> Mode {
        self.backend.mode()
    }

    /// Log in if the deployment needs a session and none is cached yet.
    pub fn ensure_session(&self) -> Result<(), SessionError> {
        self.backend.authenticate(&self.executor).map(|_| ())
    }

    /// Forget the cached session, if any.
    pub fn invalidate_session(&self) {
        self.backend.invalidate();
    }

    /// Upload `local_path` into the remote directory `remote_path`.
    pub fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        options: UploadOptions,
    ) -> Result<OperationResult, SessionError> {
        let prepared = match PreparedUpload::open(local_path.as_ref(), remote_path, options) {
            Ok(prepared) => prepared,
            Err(failure) => return Ok(Err(failure)),
        };
        let auth = self.backend.authenticate(&self.executor)?;
        Ok(self.backend.upload(&self.executor, &auth, prepared))
    }

    /// Download `remote_path`. With a destination the body is written to
    /// that file; without one the caller gets `Payload::Stream` and owns
    /// the connection until the stream is dropped.
    pub fn download_file(
        &self,
        remote_path: &str,
        local_path: Option<&Path>,
    ) -> Result<OperationResult, SessionError> {
        if let Some(destination) = local_path {
            if let Err(failure) = download::check_destination(destination) {
                return Ok(Err(failure));
            }
        }
        let auth = self.backend.authenticate(&self.executor)?;
        let response = match self.backend.download(&self.executor, &auth, remote_path) {
            Ok(response) => response,
            Err(failure) => return Ok(Err(failure)),
        };
        Ok(match local_path {
            Some(destination) => download::save(remote_path, response, destination),
            None => download::into_stream(remote_path, response),
        })
    }

    pub fn list_files(&self, remote_path: &str) -> Result<OperationResult, SessionError> {
        let auth = self.backend.authenticate(&self.executor)?;
        Ok(self.backend.list(&self.executor, &auth, remote_path))
    }

    pub fn create_folder(&self, path: &str) -> Result<OperationResult, SessionError> {
        let auth = self.backend.authenticate(&self.executor)?;
        Ok(self.backend.create_folder(&self.executor, &auth, path))
    }

    pub fn delete(&self, path: &str) -> Result<OperationResult, SessionError> {
        let auth = self.backend.authenticate(&self.executor)?;
        Ok(self.backend.delete(&self.executor, &auth, path))
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<OperationResult, SessionError> {
        let auth = self.backend.authenticate(&self.executor)?;
        Ok(self.backend.rename(&self.executor, &auth, old_path, new_path))
    }

    /// Ask the server whether `path` is a file or a directory.
    pub fn is_file(&self, path: &str) -> Result<OperationResult, SessionError> {
        let auth = self.backend.authenticate(&self.executor)?;
        Ok(self.backend.is_file(&self.executor, &auth, path))
    }
}
