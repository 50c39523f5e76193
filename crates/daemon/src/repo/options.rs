// Immutable sync settings derived once at startup.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use gitserve_common::locator::RepoLocator;

/// Default interval between sync iterations.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default remote name.
pub const DEFAULT_REMOTE: &str = "origin";

/// Authentication material for the remote.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Anonymous access (public HTTP remotes, local paths).
    None,
    /// SSH keypair loaded from disk.
    SshKey { username: String, private_key: PathBuf, passphrase: Option<String> },
}

impl Credentials {
    /// Key credentials for `locator`, using the locator's user or `git`.
    pub fn ssh_key(locator: &RepoLocator, private_key: impl Into<PathBuf>) -> Self {
        Self::SshKey {
            username: locator.username().unwrap_or("git").to_string(),
            private_key: private_key.into(),
            passphrase: None,
        }
    }

    /// Same credentials with the key passphrase replaced.
    pub fn with_passphrase(self, passphrase: String) -> Self {
        match self {
            Self::SshKey { username, private_key, .. } => {
                Self::SshKey { username, private_key, passphrase: Some(passphrase) }
            }
            other => other,
        }
    }

    pub fn private_key(&self) -> Option<&PathBuf> {
        match self {
            Self::SshKey { private_key, .. } => Some(private_key),
            Self::None => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::SshKey { username, private_key, passphrase } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("private_key", private_key)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Everything the sync loop needs to talk to the remote.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub locator: RepoLocator,
    pub credentials: Credentials,
    pub remote_name: String,
    /// Branch to track; `None` follows the remote's default branch.
    pub branch: Option<String>,
    pub interval: Duration,
}

impl SyncOptions {
    pub fn new(locator: RepoLocator) -> Self {
        Self {
            locator,
            credentials: Credentials::None,
            remote_name: DEFAULT_REMOTE.to_string(),
            branch: None,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
