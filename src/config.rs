// Configuration: which server to talk to and with which credentials.
//
// The config file is JSON. It either describes a single environment
// directly ({server, auth, defaults}) or a set of named environments with
// a default selection. Loading happens once at startup in `main.rs`; the
// library itself only needs a resolved `Environment`.

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Hosts containing this marker are served by the SaaS deployment.
pub const SAAS_HOST_MARKER: &str = "crushftp.com";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MFT_CONFIG";
/// Environment variable selecting a named environment.
pub const ENVIRONMENT_ENV_VAR: &str = "MFT_ENV";

/// Which API variant a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// REST/JSON endpoints, basic auth on every request.
    OnPrem,
    /// Legacy form-encoded endpoints behind a cookie session.
    Saas,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::OnPrem => f.write_str("on-prem"),
            Mode::Saas => f.write_str("saas"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Explicit HTTP proxy URL. When absent the system proxy settings apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

// Keep the password out of debug logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default = "default_remote_path")]
    pub upload_path: String,
    #[serde(default = "default_local_path")]
    pub download_path: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            upload_path: default_remote_path(),
            download_path: default_local_path(),
        }
    }
}

/// One deployment the client can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub defaults: Defaults,
    /// Whether upload requests follow HTTP redirects.
    #[serde(default)]
    pub follow_upload_redirects: bool,
}

impl Environment {
    /// Convenience constructor with default paths and policies.
    pub fn new(
        protocol: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Self {
        Environment {
            server: ServerConfig {
                protocol: protocol.to_string(),
                host: host.to_string(),
                port,
                proxy: None,
            },
            auth: AuthConfig {
                username: username.to_string(),
                password: password.to_string(),
            },
            defaults: Defaults::default(),
            follow_upload_redirects: false,
        }
    }

    /// Derived from the host name; never stored.
    pub fn mode(&self) -> Mode {
        if self.server.host.contains(SAAS_HOST_MARKER) {
            Mode::Saas
        } else {
            Mode::OnPrem
        }
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.server.protocol, self.server.host, self.server.port
        )
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            matches!(self.server.protocol.as_str(), "http" | "https"),
            "unsupported protocol '{}', expected http or https",
            self.server.protocol
        );
        ensure!(!self.server.host.trim().is_empty(), "server host is empty");
        ensure!(self.server.port != 0, "server port must be non-zero");
        ensure!(
            !self.auth.username.trim().is_empty(),
            "auth username is empty"
        );
        Ok(())
    }
}

/// Config file with several named environments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiEnvironment {
    pub environments: BTreeMap<String, Environment>,
    #[serde(default)]
    pub default_environment: Option<String>,
}

/// Either shape accepted on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigFile {
    Multi(MultiEnvironment),
    Single(Environment),
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("config is not a valid environment description")
    }

    /// Pick one environment: the requested name, then the configured
    /// default, then the only entry if there is exactly one.
    pub fn select(self, requested: Option<&str>) -> Result<(String, Environment)> {
        match self {
            ConfigFile::Single(env) => {
                if let Some(name) = requested {
                    bail!("environment '{name}' requested but config defines a single environment");
                }
                Ok(("default".to_string(), env))
            }
            ConfigFile::Multi(mut multi) => {
                let chosen = requested
                    .map(str::to_string)
                    .or(multi.default_environment.clone());
                let name = match chosen {
                    Some(name) => name,
                    None if multi.environments.len() == 1 => {
                        multi.environments.keys().next().cloned().unwrap_or_default()
                    }
                    None => bail!(
                        "config defines {} environments but no defaultEnvironment",
                        multi.environments.len()
                    ),
                };
                let env = multi.environments.remove(&name).with_context(|| {
                    format!("environment '{name}' is not defined in config")
                })?;
                Ok((name, env))
            }
        }
    }
}

/// Where the config file is looked up, in order.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(explicit);
    }
    dirs::config_dir()
        .map(|d| d.join("mft-cli").join("config.json"))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Read, parse, select and validate.
pub fn load_from(path: &Path, requested: Option<&str>) -> Result<(String, Environment)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let (name, env) = ConfigFile::parse(&text)?.select(requested)?;
    env.validate()
        .with_context(|| format!("invalid environment '{name}' in {}", path.display()))?;
    Ok((name, env))
}

/// Load using the standard lookup and `MFT_ENV`.
pub fn load() -> Result<(String, Environment)> {
    let requested = std::env::var(ENVIRONMENT_ENV_VAR).ok();
    load_from(&config_path(), requested.as_deref())
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_remote_path() -> String {
    "/".to_string()
}

fn default_local_path() -> String {
    ".".to_string()
}
