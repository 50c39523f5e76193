// Consistent exit codes for the gitserve CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/configuration error
//   11 = authentication error
//   13 = network error
//   14 = shutdown exceeded the grace period

use std::process;

use gitserve_common::locator::LocatorError;
use gitserve_daemon::config::ConfigError;
use gitserve_daemon::repo::RemoteError;
use gitserve_daemon::runtime::ServeError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Network = 13,
    ShutdownTimeout = 14,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(serve_err) = cause.downcast_ref::<ServeError>() {
                match serve_err {
                    ServeError::ShutdownTimeout { .. } => return Self::ShutdownTimeout,
                    ServeError::Config(_) => return Self::Usage,
                    _ => {}
                }
            }
            if let Some(remote_err) = cause.downcast_ref::<RemoteError>() {
                return Self::from_remote(remote_err);
            }
            if cause.is::<LocatorError>() || cause.is::<ConfigError>() {
                return Self::Usage;
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                if io_err.kind() == std::io::ErrorKind::TimedOut {
                    return Self::Network;
                }
            }
        }

        Self::Error
    }

    fn from_remote(err: &RemoteError) -> Self {
        match err {
            RemoteError::Auth(_) | RemoteError::IncorrectPassphrase { .. } => Self::Auth,
            RemoteError::Network(_) => Self::Network,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
