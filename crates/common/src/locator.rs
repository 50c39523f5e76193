// Repository locators: scheme detection and `https://` defaulting.

use std::fmt;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("repository locator is empty")]
    Empty,

    #[error("invalid repository url `{input}`: {message}")]
    InvalidUrl { input: String, message: String },

    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),
}

/// How the remote is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Ssh,
    /// A repository on the local filesystem (absolute path or `file://`).
    Local,
}

/// A normalized repository locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    url: String,
    transport: Transport,
    username: Option<String>,
}

impl RepoLocator {
    /// Normalize user input into a locator.
    ///
    /// - `scheme://...` is used as-is (`http`, `https`, `git`, `ssh`, `file`)
    /// - `user@host:path` (scp-style SSH) is used as-is
    /// - an absolute filesystem path is a local remote
    /// - anything else (`host/path`) gets an `https://` prefix
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(LocatorError::Empty);
        }

        if input.starts_with('/') {
            return Ok(Self { url: input.to_string(), transport: Transport::Local, username: None });
        }

        if input.contains("://") {
            return Self::parse_url(input);
        }

        if let Some(username) = scp_username(input) {
            return Ok(Self {
                url: input.to_string(),
                transport: Transport::Ssh,
                username: Some(username.to_string()),
            });
        }

        Self::parse_url(&format!("https://{input}"))
    }

    fn parse_url(input: &str) -> Result<Self, LocatorError> {
        let url = Url::parse(input).map_err(|error| LocatorError::InvalidUrl {
            input: input.to_string(),
            message: error.to_string(),
        })?;

        let transport = match url.scheme() {
            "http" | "https" | "git" => Transport::Http,
            "ssh" | "git+ssh" => Transport::Ssh,
            "file" => Transport::Local,
            other => return Err(LocatorError::UnsupportedScheme(other.to_string())),
        };
        let username = Some(url.username()).filter(|name| !name.is_empty()).map(str::to_string);

        Ok(Self { url: input.to_string(), transport, username })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// User named in the locator (`git` in `git@github.com:org/repo`).
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// SSH remotes authenticate with a keypair.
    pub fn requires_ssh_key(&self) -> bool {
        self.transport == Transport::Ssh
    }
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Returns the user of an scp-style `user@host:path` locator.
fn scp_username(input: &str) -> Option<&str> {
    let (authority, path) = input.split_once(':')?;
    if path.is_empty() || authority.contains('/') {
        return None;
    }
    let (user, host) = authority.split_once('@')?;
    if user.is_empty() || host.is_empty() {
        return None;
    }
    Some(user)
}
