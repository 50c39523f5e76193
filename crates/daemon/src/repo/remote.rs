// Remote repository client abstraction. Trait-based so the sync loop and the
// coordinator can be driven by scripted clients in tests.

use std::path::PathBuf;

use thiserror::Error;

use super::options::SyncOptions;
use crate::vfs::Snapshot;

/// Result of a fetch against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The tracked reference already points at the served commit.
    UpToDate,
    /// The remote moved; `target` is the new commit id.
    Updated { target: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("incorrect passphrase for private key `{}`", path.display())]
    IncorrectPassphrase { path: PathBuf },

    #[error("network error: {0}")]
    Network(String),

    #[error("repository has no working tree to keep updated")]
    BareRepository,

    #[error("reference `{0}` not found on remote")]
    ReferenceNotFound(String),

    #[error("no repository has been cloned yet")]
    NotCloned,

    #[error("git error: {0}")]
    Git(String),

    #[error("remote task failed: {0}")]
    Task(String),
}

/// Clone/fetch/pull against one remote.
///
/// Methods block; async callers run them on the blocking thread pool.
/// Exactly one working copy is managed per client.
pub trait RemoteClient: Send + Sync + 'static {
    /// Clone the remote and materialize the tracked reference.
    fn clone_repository(&self, options: &SyncOptions) -> Result<Snapshot, RemoteError>;

    /// Fail with [`RemoteError::BareRepository`] when there is no branch
    /// whose tree could be kept up to date.
    fn check_worktree(&self) -> Result<(), RemoteError>;

    /// Fetch the tracked reference and report whether it moved.
    fn fetch(&self, options: &SyncOptions) -> Result<FetchOutcome, RemoteError>;

    /// Force the working copy to the fetched commit (remote wins) and
    /// materialize the new tree.
    fn pull(&self, options: &SyncOptions) -> Result<Snapshot, RemoteError>;
}
