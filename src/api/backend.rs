// Deployment backends.
//
// Each deployment variant is a `Backend`: it decides how a request is
// authenticated and what shape each operation takes on the wire. The
// facade in `api/mod.rs` only ever talks to `dyn Backend`.

use super::executor::{Auth, RequestExecutor};
use super::result::{self, Failure, OperationResult};
use super::session::{SessionError, SessionManager, LEGACY_ENDPOINT};
use super::upload::{self, PreparedUpload, UploadLayout};
use crate::config::{AuthConfig, Environment, Mode};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Response;
use serde_json::json;
use tracing::debug;

pub const UPLOAD_ENDPOINT: &str = "/api/upload";
pub const DOWNLOAD_ENDPOINT: &str = "/api/download";
pub const LIST_ENDPOINT: &str = "/api/list";
pub const CREATE_FOLDER_ENDPOINT: &str = "/api/createFolder";
pub const DELETE_ENDPOINT: &str = "/api/delete";
pub const RENAME_ENDPOINT: &str = "/api/rename";
pub const IS_FILE_ENDPOINT: &str = "/api/isFile";

/// Characters left alone by URI component encoding.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One deployment variant's view of the remote operations.
///
/// Operations that both variants express identically (JSON POST of the
/// path arguments) have default implementations; variants override what
/// differs.
pub trait Backend: Send + Sync {
    fn mode(&self) -> Mode;

    /// Credentials for the next request. May log in.
    fn authenticate(&self, executor: &RequestExecutor) -> Result<Auth, SessionError>;

    /// Drop any cached session state.
    fn invalidate(&self) {}

    fn upload_layout(&self, compressed: bool) -> UploadLayout;

    fn list(&self, executor: &RequestExecutor, auth: &Auth, path: &str) -> OperationResult;

    fn upload(
        &self,
        executor: &RequestExecutor,
        auth: &Auth,
        prepared: PreparedUpload,
    ) -> OperationResult {
        let layout = self.upload_layout(prepared.is_compressed());
        upload::send(executor, auth, self.mode(), layout, prepared)
    }

    fn create_folder(
        &self,
        executor: &RequestExecutor,
        auth: &Auth,
        path: &str,
    ) -> OperationResult {
        json_call(
            executor,
            auth,
            "createFolder",
            CREATE_FOLDER_ENDPOINT,
            json!({ "path": path }),
            format!("Created folder {path}"),
        )
    }

    fn delete(&self, executor: &RequestExecutor, auth: &Auth, path: &str) -> OperationResult {
        json_call(
            executor,
            auth,
            "delete",
            DELETE_ENDPOINT,
            json!({ "path": path }),
            format!("Deleted {path}"),
        )
    }

    fn rename(
        &self,
        executor: &RequestExecutor,
        auth: &Auth,
        old_path: &str,
        new_path: &str,
    ) -> OperationResult {
        json_call(
            executor,
            auth,
            "rename",
            RENAME_ENDPOINT,
            json!({ "oldPath": old_path, "newPath": new_path }),
            format!("Renamed {old_path} to {new_path}"),
        )
    }

    fn is_file(&self, executor: &RequestExecutor, auth: &Auth, path: &str) -> OperationResult {
        json_call(
            executor,
            auth,
            "isFile",
            IS_FILE_ENDPOINT,
            json!({ "path": path }),
            format!("Checked type of {path}"),
        )
    }

    /// Request a file and hand back the successful response unread.
    ///
    /// Uses the default timeout: reqwest applies it to each read of the
    /// body, so it limits stalls rather than the length of the transfer.
    fn download(
        &self,
        executor: &RequestExecutor,
        auth: &Auth,
        path: &str,
    ) -> Result<Response, Failure> {
        let body = json!({ "path": path });
        let response = executor.post_json("download", DOWNLOAD_ENDPOINT, auth, &body, None)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Failure::from_response("download", response))
        }
    }
}

/// Pick the backend for an environment.
pub fn for_environment(env: &Environment) -> Box<dyn Backend> {
    match env.mode() {
        Mode::OnPrem => Box::new(OnPrem::new(env.auth.clone())),
        Mode::Saas => Box::new(Saas::new(env.auth.clone())),
    }
}

fn json_call(
    executor: &RequestExecutor,
    auth: &Auth,
    operation: &'static str,
    endpoint: &str,
    body: serde_json::Value,
    message: String,
) -> OperationResult {
    let response = executor.post_json(operation, endpoint, auth, &body, None)?;
    result::complete(operation, message, response)
}

/// On-premises deployment: REST/JSON endpoints, basic auth per request.
#[derive(Debug, Clone)]
pub struct OnPrem {
    credentials: AuthConfig,
}

impl OnPrem {
    pub fn new(credentials: AuthConfig) -> Self {
        OnPrem { credentials }
    }
}

impl Backend for OnPrem {
    fn mode(&self) -> Mode {
        Mode::OnPrem
    }

    fn authenticate(&self, _executor: &RequestExecutor) -> Result<Auth, SessionError> {
        Ok(Auth::Basic {
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
        })
    }

    fn upload_layout(&self, compressed: bool) -> UploadLayout {
        UploadLayout {
            endpoint: UPLOAD_ENDPOINT,
            path_field: if compressed { "uploadPath" } else { "path" },
            file_field: "file",
            extra_fields: &[],
        }
    }

    fn list(&self, executor: &RequestExecutor, auth: &Auth, path: &str) -> OperationResult {
        json_call(
            executor,
            auth,
            "list",
            LIST_ENDPOINT,
            json!({ "path": path }),
            format!("Listed {path}"),
        )
    }
}

/// SaaS deployment: legacy web interface behind a cookie session.
#[derive(Debug)]
pub struct Saas {
    credentials: AuthConfig,
    session: SessionManager,
}

impl Saas {
    pub fn new(credentials: AuthConfig) -> Self {
        Saas {
            credentials,
            session: SessionManager::new(),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }
}

impl Backend for Saas {
    fn mode(&self) -> Mode {
        Mode::Saas
    }

    fn authenticate(&self, executor: &RequestExecutor) -> Result<Auth, SessionError> {
        self.session.auth(executor, &self.credentials)
    }

    fn invalidate(&self) {
        self.session.invalidate();
    }

    fn upload_layout(&self, _compressed: bool) -> UploadLayout {
        UploadLayout {
            endpoint: LEGACY_ENDPOINT,
            path_field: "uploadPath",
            file_field: "file_lWsx_SINGLE_FILE_POST",
            extra_fields: &[("the_action", "STOR")],
        }
    }

    fn list(&self, executor: &RequestExecutor, auth: &Auth, path: &str) -> OperationResult {
        let encoded = double_encode(path);
        let token = rand::random::<f64>().to_string();
        debug!(path, encoded = %encoded, "legacy listing");
        let response = executor.post_form(
            "list",
            LEGACY_ENDPOINT,
            auth,
            &[
                ("command", "getXMLListing"),
                ("path", encoded.as_str()),
                ("random", token.as_str()),
            ],
        )?;
        result::complete("list", format!("Listed {path}"), response)
    }
}

/// Path as the legacy listing expects it: URI-component encoded twice.
fn double_encode(path: &str) -> String {
    let once = utf8_percent_encode(path, URI_COMPONENT).to_string();
    utf8_percent_encode(&once, URI_COMPONENT).to_string()
}
