// Remote repository access: sync options, the client seam, and the git2 client.

pub mod auth;
pub mod git;
pub mod options;
pub mod remote;

pub use auth::{clone_with_passphrase_retry, NoPrompt, PassphrasePrompt, MAX_PASSPHRASE_ATTEMPTS};
pub use git::GitRemote;
pub use options::{Credentials, SyncOptions};
pub use remote::{FetchOutcome, RemoteClient, RemoteError};
