// Terminal passphrase prompt.

use std::path::Path;

use anyhow::Context;
use gitserve_daemon::repo::{PassphrasePrompt, MAX_PASSPHRASE_ATTEMPTS};
use inquire::Password;

/// Reads private key passphrases from the terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompt;

impl PassphrasePrompt for InquirePrompt {
    fn passphrase(&mut self, private_key: &Path, attempt: usize) -> anyhow::Result<String> {
        let message = if attempt <= 1 {
            format!("Passphrase for {}:", private_key.display())
        } else {
            format!(
                "Incorrect passphrase, try again ({attempt}/{MAX_PASSPHRASE_ATTEMPTS}):"
            )
        };
        Password::new(&message)
            .without_confirmation()
            .prompt()
            .context("failed to read private key passphrase")
    }
}
