// git2-backed remote client.
//
// Objects live in a private bare clone under the cache directory; the served
// tree is materialized into an in-memory `Snapshot`. Nothing is ever checked
// out to disk, so a forced update is just moving the branch ref.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use git2::build::RepoBuilder;
use git2::{
    Commit, Cred, ErrorClass, ErrorCode, FetchOptions, ObjectType, RemoteCallbacks, Repository,
};
use gitserve_common::locator::RepoLocator;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::options::{Credentials, SyncOptions};
use super::remote::{FetchOutcome, RemoteClient, RemoteError};
use crate::vfs::{Snapshot, SnapshotBuilder, SnapshotRef};

/// Git file mode of a symbolic link.
const SYMLINK_MODE: i32 = 0o120000;

struct Checkout {
    repo: Repository,
    branch: Option<String>,
}

/// [`RemoteClient`] backed by libgit2.
pub struct GitRemote {
    cache_dir: PathBuf,
    checkout: Mutex<Option<Checkout>>,
}

impl GitRemote {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into(), checkout: Mutex::new(None) }
    }

    /// Object store location for `locator`.
    pub fn repository_dir(&self, locator: &RepoLocator) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(locator.as_str().as_bytes()));
        self.cache_dir.join(&digest[..16])
    }

    fn lock(&self) -> MutexGuard<'_, Option<Checkout>> {
        self.checkout.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RemoteClient for GitRemote {
    fn clone_repository(&self, options: &SyncOptions) -> Result<Snapshot, RemoteError> {
        let target = self.repository_dir(&options.locator);
        reset_dir(&target)?;

        let mut builder = RepoBuilder::new();
        builder.bare(true).fetch_options(fetch_options(&options.credentials));
        if let Some(branch) = &options.branch {
            builder.branch(branch);
        }
        let remote_name = options.remote_name.clone();
        builder.remote_create(move |repo, _name, url| repo.remote(&remote_name, url));

        info!(url = %options.locator, path = %target.display(), "cloning repository");
        let repo = builder
            .clone(options.locator.as_str(), &target)
            .map_err(|error| classify(error, &options.credentials))?;

        let branch = tracked_branch(&repo);
        let snapshot = match repo.head() {
            Ok(head) => {
                let commit = head.peel_to_commit().map_err(git_error)?;
                materialize(&repo, &commit, branch.as_deref()).map_err(git_error)?
            }
            Err(error) if error.code() == ErrorCode::UnbornBranch => Snapshot::default(),
            Err(error) => return Err(git_error(error)),
        };

        info!(
            branch = branch.as_deref().unwrap_or("<none>"),
            commit = snapshot.commit_id().unwrap_or("<none>"),
            files = snapshot.file_count(),
            "repository cloned"
        );
        *self.lock() = Some(Checkout { repo, branch });
        Ok(snapshot)
    }

    fn check_worktree(&self) -> Result<(), RemoteError> {
        match self.lock().as_ref() {
            Some(Checkout { branch: Some(_), .. }) => Ok(()),
            Some(_) => Err(RemoteError::BareRepository),
            None => Err(RemoteError::NotCloned),
        }
    }

    fn fetch(&self, options: &SyncOptions) -> Result<FetchOutcome, RemoteError> {
        let guard = self.lock();
        let checkout = guard.as_ref().ok_or(RemoteError::NotCloned)?;
        let branch = checkout.branch.as_deref().ok_or(RemoteError::BareRepository)?;
        let tracking = tracking_ref(&options.remote_name, branch);

        let mut remote = checkout
            .repo
            .find_remote(&options.remote_name)
            .map_err(|error| classify(error, &options.credentials))?;
        let refspec = format!("+refs/heads/{branch}:{tracking}");
        let mut fetch_opts = fetch_options(&options.credentials);
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)
            .map_err(|error| classify(error, &options.credentials))?;

        let target = checkout
            .repo
            .refname_to_id(&tracking)
            .map_err(|_| RemoteError::ReferenceNotFound(branch.to_string()))?;
        let served = checkout.repo.refname_to_id(&local_ref(branch)).ok();

        if served == Some(target) {
            Ok(FetchOutcome::UpToDate)
        } else {
            debug!(%branch, %target, "remote moved");
            Ok(FetchOutcome::Updated { target: target.to_string() })
        }
    }

    fn pull(&self, options: &SyncOptions) -> Result<Snapshot, RemoteError> {
        let guard = self.lock();
        let checkout = guard.as_ref().ok_or(RemoteError::NotCloned)?;
        let branch = checkout.branch.as_deref().ok_or(RemoteError::BareRepository)?;
        let repo = &checkout.repo;

        let target = repo
            .refname_to_id(&tracking_ref(&options.remote_name, branch))
            .map_err(|_| RemoteError::ReferenceNotFound(branch.to_string()))?;
        let commit = repo.find_commit(target).map_err(git_error)?;

        // Build the new tree before moving the ref so a failure leaves the
        // next fetch reporting the same update.
        let snapshot = materialize(repo, &commit, Some(branch)).map_err(git_error)?;
        repo.reference(&local_ref(branch), target, true, "gitserve: forced update from remote")
            .map_err(git_error)?;

        Ok(snapshot)
    }
}

fn fetch_options(credentials: &Credentials) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Credentials::SshKey { username, private_key, passphrase } = credentials {
        // libgit2 keeps asking while the remote rejects us; answer once.
        let mut attempted = false;
        callbacks.credentials(move |_url, username_from_url, _allowed| {
            if attempted {
                return Err(git2::Error::from_str("ssh key was rejected by the remote"));
            }
            attempted = true;
            Cred::ssh_key(
                username_from_url.unwrap_or(username.as_str()),
                None,
                private_key,
                passphrase.as_deref(),
            )
        });
    }
    callbacks.transfer_progress(|progress| {
        if progress.received_objects() == progress.total_objects() {
            debug!(
                objects = progress.total_objects(),
                bytes = progress.received_bytes(),
                "objects received"
            );
        }
        true
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

fn tracked_branch(repo: &Repository) -> Option<String> {
    let head = repo.head().ok()?;
    if !head.is_branch() {
        return None;
    }
    head.shorthand().map(str::to_string)
}

fn tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{remote}/{branch}")
}

fn local_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

/// Read every blob reachable from the commit's tree into memory.
fn materialize(
    repo: &Repository,
    commit: &Commit<'_>,
    branch: Option<&str>,
) -> Result<Snapshot, git2::Error> {
    let mut builder = SnapshotBuilder::new()
        .modified_at(commit_time(commit))
        .reference(SnapshotRef { branch: branch.map(str::to_string), commit: commit.id().to_string() });

    let mut pending = VecDeque::new();
    pending.push_back((commit.tree()?, String::new()));

    while let Some((tree, prefix)) = pending.pop_front() {
        for entry in tree.iter() {
            let Ok(name) = std::str::from_utf8(entry.name_bytes()) else {
                debug!(%prefix, "skipping entry with non-utf8 name");
                continue;
            };
            let path = if prefix.is_empty() { name.to_string() } else { format!("{prefix}/{name}") };

            match entry.kind() {
                Some(ObjectType::Tree) => {
                    builder.insert_dir(&path);
                    pending.push_back((repo.find_tree(entry.id())?, path));
                }
                Some(ObjectType::Blob) if entry.filemode() != SYMLINK_MODE => {
                    let blob = repo.find_blob(entry.id())?;
                    builder.insert_file(&path, bytes::Bytes::copy_from_slice(blob.content()));
                }
                // Symlinks and submodules have no servable content.
                _ => debug!(%path, "skipping tree entry"),
            }
        }
    }

    Ok(builder.build())
}

fn commit_time(commit: &Commit<'_>) -> SystemTime {
    u64::try_from(commit.time().seconds())
        .map(|seconds| UNIX_EPOCH + Duration::from_secs(seconds))
        .unwrap_or(UNIX_EPOCH)
}

fn reset_dir(path: &Path) -> Result<(), RemoteError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|error| {
            RemoteError::Git(format!("failed to clear `{}`: {error}", path.display()))
        })?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            RemoteError::Git(format!("failed to create `{}`: {error}", parent.display()))
        })?;
    }
    Ok(())
}

fn git_error(error: git2::Error) -> RemoteError {
    RemoteError::Git(error.message().to_string())
}

/// Map a transport error onto the remote error taxonomy.
///
/// libssh2 does not type passphrase failures, so the message is inspected.
fn classify(error: git2::Error, credentials: &Credentials) -> RemoteError {
    let message = error.message().to_string();
    let lower = message.to_lowercase();

    if let Some(path) = credentials.private_key() {
        if lower.contains("passphrase") || lower.contains("password") {
            return RemoteError::IncorrectPassphrase { path: path.clone() };
        }
    }

    match (error.code(), error.class()) {
        (ErrorCode::Auth, _) => RemoteError::Auth(message),
        (ErrorCode::Certificate, _)
        | (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh) => {
            RemoteError::Network(message)
        }
        _ => RemoteError::Git(message),
    }
}
