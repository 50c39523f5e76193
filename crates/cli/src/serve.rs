// `gitserve <repository>`: load config, clone, serve until signalled.

use std::sync::Arc;

use anyhow::Context;
use gitserve_common::locator::RepoLocator;
use gitserve_daemon::config::ServeConfig;
use gitserve_daemon::repo::{Credentials, GitRemote, SyncOptions};
use gitserve_daemon::runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::args::expand_home;
use crate::prompt::InquirePrompt;
use crate::Cli;

pub async fn run(cli: &Cli, repository: &str) -> anyhow::Result<()> {
    let mut config = ServeConfig::load(cli.config.as_deref()).context("failed to load config")?;
    apply_overrides(&mut config, cli);
    init_tracing(&config, cli.verbose);
    config.validate()?;

    let locator = RepoLocator::parse(repository)
        .with_context(|| format!("invalid repository `{repository}`"))?;
    let options = sync_options(&config, cli, locator);
    debug!(?options, cache_dir = %config.cache_dir().display(), "resolved settings");

    let client = Arc::new(GitRemote::new(config.cache_dir()));
    runtime::run(&config, options, client, InquirePrompt, cli.passphrase).await?;
    Ok(())
}

/// Flags win over the config file and environment.
fn apply_overrides(config: &mut ServeConfig, cli: &Cli) {
    if let Some(address) = &cli.address {
        config.listen_addr = address.clone();
    }
    if let Some(branch) = &cli.branch {
        config.branch = Some(branch.clone());
    }
    if let Some(interval) = cli.update_interval {
        // Sub-second intervals round up so validation never sees zero.
        config.update_interval_secs = interval.as_secs().max(1);
    }
}

fn sync_options(config: &ServeConfig, cli: &Cli, locator: RepoLocator) -> SyncOptions {
    let credentials = if locator.requires_ssh_key() {
        Credentials::ssh_key(&locator, expand_home(&cli.private_key))
    } else {
        Credentials::None
    };

    SyncOptions::new(locator)
        .with_credentials(credentials)
        .with_remote_name(config.remote_name.clone())
        .with_branch(config.branch.clone())
        .with_interval(cli.update_interval.unwrap_or_else(|| config.update_interval()))
}

fn init_tracing(config: &ServeConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if verbose { "debug" } else { config.log_filter.as_str() };
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    // Ignored when a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
