// Initial clone with bounded passphrase retries.

use std::path::Path;

use tracing::warn;

use super::options::{Credentials, SyncOptions};
use super::remote::{RemoteClient, RemoteError};
use crate::vfs::Snapshot;

/// Clone attempts made before an incorrect passphrase becomes fatal.
pub const MAX_PASSPHRASE_ATTEMPTS: usize = 3;

/// Source of private key passphrases (usually an interactive terminal).
pub trait PassphrasePrompt: Send {
    /// Ask for the passphrase of `private_key`. `attempt` starts at 1.
    fn passphrase(&mut self, private_key: &Path, attempt: usize) -> anyhow::Result<String>;
}

/// Prompt for non-interactive runs: every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl PassphrasePrompt for NoPrompt {
    fn passphrase(&mut self, private_key: &Path, _attempt: usize) -> anyhow::Result<String> {
        anyhow::bail!("private key `{}` needs a passphrase but no prompt is available", private_key.display())
    }
}

/// Perform the initial clone, re-prompting on an incorrect passphrase.
///
/// When `prompt_first` is set the passphrase is asked for before the first
/// attempt. Returns the options with the accepted passphrase filled in.
pub fn clone_with_passphrase_retry<C, P>(
    client: &C,
    mut options: SyncOptions,
    prompt: &mut P,
    prompt_first: bool,
) -> Result<(SyncOptions, Snapshot), RemoteError>
where
    C: RemoteClient + ?Sized,
    P: PassphrasePrompt + ?Sized,
{
    let mut attempt = 1;
    loop {
        let needs_prompt = attempt > 1 || prompt_first;
        if let (true, Some(private_key)) = (needs_prompt, options.credentials.private_key()) {
            let passphrase = prompt
                .passphrase(private_key, attempt)
                .map_err(|error| RemoteError::Auth(format!("{error:#}")))?;
            options.credentials = options.credentials.clone().with_passphrase(passphrase);
        }

        match client.clone_repository(&options) {
            Ok(snapshot) => return Ok((options, snapshot)),
            Err(RemoteError::IncorrectPassphrase { path })
                if attempt < MAX_PASSPHRASE_ATTEMPTS
                    && matches!(options.credentials, Credentials::SshKey { .. }) =>
            {
                warn!(key = %path.display(), attempt, "private key passphrase rejected");
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
