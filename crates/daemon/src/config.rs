// Server configuration.
//
// File: `~/.gitserve/config.toml` (or an explicit `--config` path).
// Precedence, highest first: command line, environment, file, defaults.
// The command line layer is applied by the binary.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gitserve_common::path::is_valid_path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Root directory for gitserve user state: `~/.gitserve/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".gitserve"))
}

/// Path to the default config file: `~/.gitserve/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Where bare clones are kept when `cache_dir` is unset.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("gitserve")
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    /// `host:port`, or `:port` for all interfaces.
    pub listen_addr: String,
    pub update_interval_secs: u64,
    /// How long in-flight requests may take to drain at shutdown.
    pub shutdown_grace_secs: u64,
    /// Document served for `/` and for directories that contain it.
    pub index_document: String,
    /// Cap on rendered directory listings (0 = unlimited).
    pub max_listing_entries: usize,
    /// Escalate to `error!` after this many failed syncs in a row.
    pub max_consecutive_failures: Option<u32>,
    pub remote_name: String,
    /// Branch to serve; the remote's default branch when unset.
    pub branch: Option<String>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            update_interval_secs: 300,
            shutdown_grace_secs: 5,
            index_document: "index.html".into(),
            max_listing_entries: 1000,
            max_consecutive_failures: None,
            remote_name: "origin".into(),
            branch: None,
            log_filter: "info".into(),
            cache_dir: None,
        }
    }
}

impl ServeConfig {
    /// Load file and environment layers.
    ///
    /// An explicit `path` must exist and parse. Without one the default file
    /// is used when present; if it cannot be read the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => match global_config_path().filter(|path| path.exists()) {
                Some(path) => Self::load_from(&path).unwrap_or_else(|error| {
                    warn!(%error, "ignoring unreadable default config file");
                    Self::default()
                }),
                None => Self::default(),
            },
        };
        config.with_env_fn(|key| std::env::var(key))
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Apply `GITSERVE_*` overrides from an environment lookup function.
    pub fn with_env_fn<F>(mut self, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(addr) = env("GITSERVE_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(value) = env("GITSERVE_UPDATE_INTERVAL_SECS") {
            self.update_interval_secs = parse_env("GITSERVE_UPDATE_INTERVAL_SECS", &value)?;
        }
        if let Ok(value) = env("GITSERVE_SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace_secs = parse_env("GITSERVE_SHUTDOWN_GRACE_SECS", &value)?;
        }
        if let Ok(branch) = env("GITSERVE_BRANCH") {
            self.branch = Some(branch).filter(|branch| !branch.is_empty());
        }
        if let Ok(dir) = env("GITSERVE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.update_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "update_interval_secs",
                message: "must be greater than zero".into(),
            });
        }
        if !is_valid_path(&self.index_document) {
            return Err(ConfigError::Invalid {
                key: "index_document",
                message: format!("`{}` is not a clean relative path", self.index_document),
            });
        }
        if self.remote_name.trim().is_empty() {
            return Err(ConfigError::Invalid { key: "remote_name", message: "must not be empty".into() });
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_listen_addr(&self.listen_addr)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Resolve a listen address. `:8080` means every interface on port 8080.
pub fn parse_listen_addr(input: &str) -> Result<SocketAddr, ConfigError> {
    let input = input.trim();
    let candidate =
        if input.starts_with(':') { format!("0.0.0.0{input}") } else { input.to_string() };

    if let Ok(addr) = candidate.parse::<SocketAddr>() {
        return Ok(addr);
    }
    candidate
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::Invalid {
            key: "listen_addr",
            message: format!("`{input}` is not a valid socket address"),
        })
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv { key: key.to_string(), value: value.to_string() })
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse config file `{}`: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid value `{value}` for {key}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
