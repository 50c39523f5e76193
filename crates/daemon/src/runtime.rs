// Serving coordinator.
//
// Startup: initial clone (fatal on failure), bind, then the HTTP server and
// the sync loop run side by side. One watch channel carries the shutdown
// signal to both. Shutdown is bounded by the grace period; overrunning it is
// a fatal error rather than a hang.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{ConfigError, ServeConfig};
use crate::repo::{clone_with_passphrase_retry, PassphrasePrompt, RemoteClient, RemoteError, SyncOptions};
use crate::serve::{router, ServeState};
use crate::sync::{SyncLoop, SyncStatus, WorkingCopy};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("initial clone of `{url}` failed")]
    InitialClone { url: String, source: RemoteError },

    #[error("failed to bind listener on {addr}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("server did not shut down within the {grace:?} grace period")]
    ShutdownTimeout { grace: Duration },

    #[error("http server exited with error")]
    Serve(#[source] io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

/// A running server: listener, sync loop and the shared working copy.
///
/// Dropping the session fires the shutdown signal without waiting.
pub struct ServeSession {
    local_addr: SocketAddr,
    working_copy: WorkingCopy,
    sync_status: watch::Receiver<SyncStatus>,
    shutdown_tx: watch::Sender<bool>,
    grace: Duration,
    server: Option<JoinHandle<io::Result<()>>>,
    sync: Option<JoinHandle<()>>,
}

impl ServeSession {
    /// Clone the remote, bind the listener and start serving.
    ///
    /// With `prompt_first` the key passphrase is requested before the first
    /// clone attempt; otherwise only after the key is rejected.
    pub async fn start<C, P>(
        config: &ServeConfig,
        options: SyncOptions,
        client: Arc<C>,
        mut prompt: P,
        prompt_first: bool,
    ) -> Result<Self, ServeError>
    where
        C: RemoteClient,
        P: PassphrasePrompt + 'static,
    {
        config.validate()?;
        let addr = config.socket_addr()?;

        let url = options.locator.to_string();
        info!(remote = %url, branch = ?options.branch, "starting gitserve");
        let clone_client = Arc::clone(&client);
        let (options, snapshot) = tokio::task::spawn_blocking(move || {
            clone_with_passphrase_retry(&*clone_client, options, &mut prompt, prompt_first)
        })
        .await
        .map_err(|error| ServeError::Task(error.to_string()))?
        .map_err(|source| ServeError::InitialClone { url, source })?;
        info!(commit = ?snapshot.commit_id(), files = snapshot.file_count(), "initial clone complete");

        let working_copy = WorkingCopy::new(snapshot);
        let listener =
            TcpListener::bind(addr).await.map_err(|source| ServeError::Bind { addr, source })?;
        let local_addr =
            listener.local_addr().map_err(|source| ServeError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let app = router(
            ServeState::new(working_copy.clone())
                .with_index_document(config.index_document.clone())
                .with_max_listing_entries(config.max_listing_entries),
        );
        let mut server_shutdown = shutdown_rx.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        let sync_loop = SyncLoop::new(client, Arc::new(options), working_copy.clone())
            .with_failure_threshold(config.max_consecutive_failures);
        let sync_status = sync_loop.status();
        let sync = tokio::spawn(sync_loop.run(shutdown_rx));

        info!(%local_addr, "serving repository");
        Ok(Self {
            local_addr,
            working_copy,
            sync_status,
            shutdown_tx,
            grace: config.shutdown_grace(),
            server: Some(server),
            sync: Some(sync),
        })
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync_status.clone()
    }

    /// Fire the shutdown signal. Fires at most once.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_if_modified(|stop| !std::mem::replace(stop, true));
    }

    /// Shut down and wait for the server to drain and the sync loop to stop,
    /// both within the grace period.
    pub async fn wait(mut self) -> Result<(), ServeError> {
        self.shutdown();
        let grace = self.grace;
        let deadline = Instant::now() + grace;

        if let Some(mut server) = self.server.take() {
            match tokio::time::timeout_at(deadline, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(error))) => return Err(ServeError::Serve(error)),
                Ok(Err(error)) => return Err(ServeError::Task(error.to_string())),
                Err(_) => {
                    server.abort();
                    error!(?grace, "in-flight requests did not drain in time");
                    return Err(ServeError::ShutdownTimeout { grace });
                }
            }
        }

        if let Some(mut sync) = self.sync.take() {
            match tokio::time::timeout_at(deadline, &mut sync).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(ServeError::Task(error.to_string())),
                Err(_) => {
                    sync.abort();
                    error!(?grace, "sync loop did not stop in time");
                    return Err(ServeError::ShutdownTimeout { grace });
                }
            }
        }

        info!("shutdown complete");
        Ok(())
    }

    /// Serve until `signal` resolves, then shut down.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("shutting down");
        self.wait().await
    }
}

impl Drop for ServeSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start a session and serve until SIGINT or SIGTERM.
pub async fn run<C, P>(
    config: &ServeConfig,
    options: SyncOptions,
    client: Arc<C>,
    prompt: P,
    prompt_first: bool,
) -> Result<(), ServeError>
where
    C: RemoteClient,
    P: PassphrasePrompt + 'static,
{
    let session = ServeSession::start(config, options, client, prompt, prompt_first).await?;
    session.run_until(shutdown_signal()).await
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
