// gitserve CLI entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};

mod args;
mod exit_code;
mod prompt;
mod serve;

use exit_code::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "gitserve",
    version,
    about = "Serve the files of a remote git repository over HTTP, kept in sync in memory"
)]
pub(crate) struct Cli {
    /// Repository to serve: a URL, `user@host:path`, or `host/path` (https is assumed)
    #[arg(value_name = "REPOSITORY")]
    repository: Option<String>,

    /// Private key used for SSH remotes
    #[arg(short = 'k', long, value_name = "PATH", default_value = "~/.ssh/id_rsa")]
    private_key: PathBuf,

    /// Ask for the private key passphrase before the first clone attempt
    #[arg(short, long)]
    passphrase: bool,

    /// Time between syncs, e.g. `300`, `90s`, `5m`, `1h` [default: 5m]
    #[arg(short, long, value_name = "DURATION", value_parser = args::parse_interval)]
    update_interval: Option<Duration>,

    /// Listen address, e.g. `:8080` or `127.0.0.1:8080` [default: :8080]
    #[arg(short, long, value_name = "ADDR")]
    address: Option<String>,

    /// Branch to serve instead of the remote's default branch
    #[arg(short, long)]
    branch: Option<String>,

    /// Config file [default: ~/.gitserve/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let Some(repository) = cli.repository.clone() else {
        if let Err(error) = Cli::command().print_help() {
            eprintln!("error: {error}");
            return ExitCode::Error.into();
        }
        return ExitCode::Success.into();
    };

    match serve::run(&cli, &repository).await {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from_error(&error).into()
        }
    }
}
