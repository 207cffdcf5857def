// Session manager for the SaaS deployment.
//
// The legacy web interface wants a cookie obtained from a login call. The
// cookie is cached for the lifetime of the owning client; there is no
// expiry or refresh, only an explicit `invalidate`.

use super::executor::{Auth, RequestExecutor};
use crate::config::AuthConfig;
use reqwest::header::{HeaderMap, SET_COOKIE};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Single dispatch endpoint of the legacy web interface.
pub const LEGACY_ENDPOINT: &str = "/WebInterface/function/";

/// Login failure. Fatal: no further operation makes sense without a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("authentication failed: server responded with HTTP {status}")]
    Rejected { status: u16, body: String },
    #[error("authentication failed: login response carried no session cookie")]
    MissingCookie,
}

/// Owns the cached session cookie of one client.
#[derive(Debug, Default)]
pub struct SessionManager {
    cookie: Mutex<Option<String>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager::default()
    }

    pub fn is_established(&self) -> bool {
        self.cached().is_some()
    }

    /// Forget the cached cookie; the next call logs in again.
    pub fn invalidate(&self) {
        *self.cookie.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached(&self) -> Option<String> {
        self.cookie
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the cached cookie, logging in first if there is none.
    ///
    /// The lock is not held during the login request, so two threads racing
    /// on the very first call may both log in. The later cookie wins.
    pub fn get_or_create(
        &self,
        executor: &RequestExecutor,
        credentials: &AuthConfig,
    ) -> Result<String, SessionError> {
        if let Some(cookie) = self.cached() {
            return Ok(cookie);
        }
        let cookie = login(executor, credentials)?;
        *self.cookie.lock().unwrap_or_else(PoisonError::into_inner) = Some(cookie.clone());
        Ok(cookie)
    }

    /// Same as `get_or_create`, wrapped as request credentials.
    pub fn auth(
        &self,
        executor: &RequestExecutor,
        credentials: &AuthConfig,
    ) -> Result<Auth, SessionError> {
        self.get_or_create(executor, credentials).map(Auth::Cookie)
    }
}

fn login(executor: &RequestExecutor, credentials: &AuthConfig) -> Result<String, SessionError> {
    let client = executor.client(None, true).map_err(SessionError::Transport)?;
    debug!(url = %executor.url(LEGACY_ENDPOINT), user = %credentials.username, "logging in");

    let response = executor
        .post(&client, LEGACY_ENDPOINT)
        .form(&[
            ("command", "login"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .map_err(SessionError::Transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(SessionError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let cookie = session_cookie(response.headers()).ok_or(SessionError::MissingCookie)?;
    info!(user = %credentials.username, "session established");
    Ok(cookie)
}

/// Join the `name=value` head of every `Set-Cookie` header.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn cookie_heads_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("CrushAuth=1700_abc; path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("currentAuth=abc; path=/"));
        assert_eq!(
            session_cookie(&headers).as_deref(),
            Some("CrushAuth=1700_abc; currentAuth=abc")
        );
    }

    #[test]
    fn no_cookies_means_no_session() {
        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn invalidate_clears_cache() {
        let manager = SessionManager::new();
        *manager.cookie.lock().unwrap() = Some("a=b".into());
        assert!(manager.is_established());
        manager.invalidate();
        assert!(!manager.is_established());
    }
}
