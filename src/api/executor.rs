// Request executor: every outbound call goes through here.
//
// The executor knows the server's base URL and the client policies
// (timeout, redirects, proxy). Credentials are supplied per call as an
// `Auth` value so the same executor serves both deployment variants.

use super::result::Failure;
use crate::config::Environment;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::redirect::Policy;
use reqwest::Proxy;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Timeout applied when a call does not ask for its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

const MAX_REDIRECTS: usize = 10;

/// Credentials attached to a single request.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// Session cookie obtained by a legacy login.
    Cookie(String),
    /// Stateless basic auth, sent on every request.
    Basic { username: String, password: String },
}

impl Auth {
    /// Attach these credentials to a request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::Cookie(cookie) => request.header(COOKIE, cookie.as_str()),
            Auth::Basic { username, password } => {
                let token = STANDARD.encode(format!("{username}:{password}"));
                request.header(AUTHORIZATION, format!("Basic {token}"))
            }
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Cookie(_) => f.write_str("Auth::Cookie(***)"),
            Auth::Basic { username, .. } => write!(f, "Auth::Basic({username})"),
        }
    }
}

/// Builds configured HTTP clients and sends requests against one server.
///
/// reqwest imposes no request or response body size limit, so large
/// transfers pass through untruncated.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    base_url: String,
    proxy: Option<String>,
    follow_upload_redirects: bool,
}

impl RequestExecutor {
    pub fn new(env: &Environment) -> Self {
        RequestExecutor {
            base_url: env.base_url(),
            proxy: env.server.proxy.clone(),
            follow_upload_redirects: env.follow_upload_redirects,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub fn follow_upload_redirects(&self) -> bool {
        self.follow_upload_redirects
    }

    /// A client with the given timeout (default 30 s) and redirect policy.
    pub fn client(
        &self,
        timeout: Option<Duration>,
        follow_redirects: bool,
    ) -> reqwest::Result<Client> {
        let policy = if follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };
        let mut builder = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .redirect(policy);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }
        builder.build()
    }

    /// Start a POST to `endpoint` on the configured server.
    pub fn post(&self, client: &Client, endpoint: &str) -> RequestBuilder {
        client.post(self.url(endpoint))
    }

    /// POST a JSON body. Any response, successful or not, is returned; only
    /// transport problems become a `Failure` here.
    pub fn post_json<T: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        endpoint: &str,
        auth: &Auth,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<Response, Failure> {
        let client = self
            .client(timeout, true)
            .map_err(|e| Failure::transport(operation, &e))?;
        debug!(operation, url = %self.url(endpoint), "POST json");
        auth.apply(self.post(&client, endpoint))
            .json(body)
            .send()
            .map_err(|e| Failure::transport(operation, &e))
    }

    /// POST form-encoded fields.
    pub fn post_form(
        &self,
        operation: &'static str,
        endpoint: &str,
        auth: &Auth,
        fields: &[(&str, &str)],
    ) -> Result<Response, Failure> {
        let client = self
            .client(None, true)
            .map_err(|e| Failure::transport(operation, &e))?;
        debug!(operation, url = %self.url(endpoint), "POST form");
        auth.apply(self.post(&client, endpoint))
            .form(fields)
            .send()
            .map_err(|e| Failure::transport(operation, &e))
    }
}
