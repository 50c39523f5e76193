// Background sync loop.
//
// Idle -> Syncing -> Idle on every tick, Stopped on cancellation or when the
// clone has no branch to follow. A failed iteration is logged and the
// previous snapshot keeps being served. Iterations never overlap: the next
// wait starts only after the current iteration returns.

pub mod working_copy;

pub use working_copy::WorkingCopy;

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::repo::{FetchOutcome, RemoteClient, RemoteError, SyncOptions};

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next tick.
    Idle,
    /// A fetch (and maybe a pull) is in flight.
    Syncing,
    /// Terminal: cancelled, or nothing to keep up to date.
    Stopped,
}

/// Observable progress of the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: LoopState,
    /// Completed iterations, successful or not.
    pub iterations: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<SystemTime>,
    /// Commit currently being served.
    pub commit: Option<String>,
}

impl SyncStatus {
    fn new(commit: Option<String>) -> Self {
        Self {
            state: LoopState::Idle,
            iterations: 0,
            consecutive_failures: 0,
            last_success: None,
            commit,
        }
    }
}

/// Result of a single fetch-then-maybe-pull cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    UpToDate,
    Updated { commit: Option<String> },
    FetchFailed(RemoteError),
    PullFailed(RemoteError),
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::UpToDate | Self::Updated { .. })
    }
}

// ── Loop ────────────────────────────────────────────────────────────

/// Keeps a [`WorkingCopy`] in step with its remote. Sole writer of the
/// working copy.
pub struct SyncLoop<C: RemoteClient> {
    client: Arc<C>,
    options: Arc<SyncOptions>,
    working_copy: WorkingCopy,
    failure_threshold: Option<u32>,
    status_tx: watch::Sender<SyncStatus>,
}

impl<C: RemoteClient> SyncLoop<C> {
    pub fn new(client: Arc<C>, options: Arc<SyncOptions>, working_copy: WorkingCopy) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::new(working_copy.commit_id()));
        Self { client, options, working_copy, failure_threshold: None, status_tx }
    }

    /// Log at `error!` once this many iterations in a row have failed.
    /// Serving continues either way.
    pub fn with_failure_threshold(mut self, threshold: Option<u32>) -> Self {
        self.failure_threshold = threshold.filter(|threshold| *threshold > 0);
        self
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Fetch once and pull if the remote moved.
    pub async fn run_iteration(&self) -> IterationOutcome {
        self.status_tx.send_modify(|status| status.state = LoopState::Syncing);

        let options = Arc::clone(&self.options);
        let fetched = blocking(&self.client, move |client| client.fetch(&options)).await;

        let outcome = match fetched {
            Ok(FetchOutcome::UpToDate) => {
                debug!(remote = %self.options.locator, "already up to date");
                IterationOutcome::UpToDate
            }
            Ok(FetchOutcome::Updated { target }) => {
                info!(remote = %self.options.locator, %target, "remote changed, pulling");
                let options = Arc::clone(&self.options);
                match blocking(&self.client, move |client| client.pull(&options)).await {
                    Ok(snapshot) => {
                        let commit = snapshot.commit_id().map(str::to_string);
                        let files = snapshot.file_count();
                        self.working_copy.replace(snapshot);
                        info!(commit = ?commit, files, "working copy updated");
                        IterationOutcome::Updated { commit }
                    }
                    Err(error) => {
                        warn!(%error, "pull failed, keeping previous snapshot");
                        IterationOutcome::PullFailed(error)
                    }
                }
            }
            Err(error) => {
                warn!(remote = %self.options.locator, %error, "fetch failed, keeping previous snapshot");
                IterationOutcome::FetchFailed(error)
            }
        };

        self.record(&outcome);
        outcome
    }

    fn record(&self, outcome: &IterationOutcome) {
        let threshold = self.failure_threshold;
        self.status_tx.send_modify(|status| {
            status.state = LoopState::Idle;
            status.iterations += 1;
            match outcome {
                IterationOutcome::UpToDate => {
                    status.consecutive_failures = 0;
                    status.last_success = Some(SystemTime::now());
                }
                IterationOutcome::Updated { commit } => {
                    status.consecutive_failures = 0;
                    status.last_success = Some(SystemTime::now());
                    status.commit = commit.clone();
                }
                IterationOutcome::FetchFailed(_) | IterationOutcome::PullFailed(_) => {
                    status.consecutive_failures += 1;
                    if threshold.is_some_and(|threshold| status.consecutive_failures >= threshold) {
                        error!(
                            failures = status.consecutive_failures,
                            "sync keeps failing, serving a stale snapshot"
                        );
                    }
                }
            }
        });
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let client = Arc::clone(&self.client);
        if let Err(error) = blocking(&client, |client| client.check_worktree()).await {
            warn!(%error, "nothing to keep up to date, sync loop stopped");
            self.stop();
            return;
        }

        info!(interval = ?self.options.interval, "sync loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.options.interval) => {}
            }

            self.run_iteration().await;
        }

        debug!("sync loop shutting down");
        self.stop();
    }

    fn stop(&self) {
        self.status_tx.send_modify(|status| status.state = LoopState::Stopped);
    }
}

/// Run a blocking client call on the blocking thread pool.
pub(crate) async fn blocking<C, T, F>(client: &Arc<C>, call: F) -> Result<T, RemoteError>
where
    C: RemoteClient + ?Sized,
    T: Send + 'static,
    F: FnOnce(&C) -> Result<T, RemoteError> + Send + 'static,
{
    let client = Arc::clone(client);
    tokio::task::spawn_blocking(move || call(&*client))
        .await
        .map_err(|error| RemoteError::Task(error.to_string()))?
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use gitserve_common::locator::RepoLocator;

    use super::*;
    use crate::vfs::{Snapshot, SnapshotRef};

    /// Remote whose fetch and pull results are scripted. An empty fetch
    /// script means "up to date".
    #[derive(Default)]
    struct MockRemote {
        worktree: Mutex<Option<RemoteError>>,
        fetches: Mutex<VecDeque<Result<FetchOutcome, RemoteError>>>,
        pulls: Mutex<VecDeque<Result<Snapshot, RemoteError>>>,
        fetch_delay: Duration,
        fetch_count: AtomicUsize,
        pull_count: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl MockRemote {
        fn push_fetch(&self, result: Result<FetchOutcome, RemoteError>) {
            self.fetches.lock().unwrap().push_back(result);
        }

        fn push_pull(&self, result: Result<Snapshot, RemoteError>) {
            self.pulls.lock().unwrap().push_back(result);
        }

        fn fetch_calls(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }

        fn pull_calls(&self) -> usize {
            self.pull_count.load(Ordering::SeqCst)
        }
    }

    impl RemoteClient for MockRemote {
        fn clone_repository(&self, _options: &SyncOptions) -> Result<Snapshot, RemoteError> {
            Ok(Snapshot::default())
        }

        fn check_worktree(&self) -> Result<(), RemoteError> {
            match self.worktree.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }

        fn fetch(&self, _options: &SyncOptions) -> Result<FetchOutcome, RemoteError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                std::thread::sleep(self.fetch_delay);
            }
            let result = self.fetches.lock().unwrap().pop_front().unwrap_or(Ok(FetchOutcome::UpToDate));
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn pull(&self, _options: &SyncOptions) -> Result<Snapshot, RemoteError> {
            self.pull_count.fetch_add(1, Ordering::SeqCst);
            self.pulls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::Git("no scripted pull".into())))
        }
    }

    fn snapshot(commit: &str, body: &'static str) -> Snapshot {
        Snapshot::builder()
            .reference(SnapshotRef { branch: Some("main".into()), commit: commit.into() })
            .file("index.html", body)
            .build()
    }

    fn options(interval: Duration) -> Arc<SyncOptions> {
        let locator = RepoLocator::parse("github.com/domano/playground").unwrap();
        Arc::new(SyncOptions::new(locator).with_interval(interval))
    }

    fn sync_loop(remote: &Arc<MockRemote>, interval: Duration) -> (SyncLoop<MockRemote>, WorkingCopy) {
        let working_copy = WorkingCopy::new(snapshot("aaa", "old"));
        let sync = SyncLoop::new(Arc::clone(remote), options(interval), working_copy.clone());
        (sync, working_copy)
    }

    async fn wait_for_iterations(status: &mut watch::Receiver<SyncStatus>, count: u64) {
        status
            .wait_for(|status| status.iterations >= count)
            .await
            .expect("sync loop should still be running");
    }

    // ── Single iterations ───────────────────────────────────────────

    #[tokio::test]
    async fn up_to_date_leaves_snapshot_unchanged() {
        let remote = Arc::new(MockRemote::default());
        let (sync, working_copy) = sync_loop(&remote, Duration::from_secs(60));
        let before = working_copy.snapshot();

        let outcome = sync.run_iteration().await;

        assert_eq!(outcome, IterationOutcome::UpToDate);
        assert!(Arc::ptr_eq(&before, &working_copy.snapshot()));
        assert_eq!(remote.pull_calls(), 0);
        assert!(sync.status().borrow().last_success.is_some());
    }

    #[tokio::test]
    async fn changed_remote_swaps_in_pulled_snapshot() {
        let remote = Arc::new(MockRemote::default());
        remote.push_fetch(Ok(FetchOutcome::Updated { target: "bbb".into() }));
        remote.push_pull(Ok(snapshot("bbb", "new")));
        let (sync, working_copy) = sync_loop(&remote, Duration::from_secs(60));

        let outcome = sync.run_iteration().await;

        assert_eq!(outcome, IterationOutcome::Updated { commit: Some("bbb".into()) });
        let served = working_copy.snapshot();
        assert_eq!(served.contents("index.html").unwrap().as_ref(), b"new");
        let status = sync.status().borrow().clone();
        assert_eq!(status.commit.as_deref(), Some("bbb"));
        assert_eq!(status.state, LoopState::Idle);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_previous_snapshot() {
        let remote = Arc::new(MockRemote::default());
        remote.push_fetch(Err(RemoteError::Network("unreachable".into())));
        let (sync, working_copy) = sync_loop(&remote, Duration::from_secs(60));
        let before = working_copy.snapshot();

        let outcome = sync.run_iteration().await;

        assert_eq!(outcome, IterationOutcome::FetchFailed(RemoteError::Network("unreachable".into())));
        assert!(Arc::ptr_eq(&before, &working_copy.snapshot()));
        assert_eq!(sync.status().borrow().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn pull_failure_keeps_previous_snapshot() {
        let remote = Arc::new(MockRemote::default());
        remote.push_fetch(Ok(FetchOutcome::Updated { target: "bbb".into() }));
        remote.push_pull(Err(RemoteError::Git("checkout conflict".into())));
        let (sync, working_copy) = sync_loop(&remote, Duration::from_secs(60));

        let outcome = sync.run_iteration().await;

        assert!(matches!(outcome, IterationOutcome::PullFailed(_)));
        assert!(!outcome.is_success());
        assert_eq!(working_copy.commit_id().as_deref(), Some("aaa"));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let remote = Arc::new(MockRemote::default());
        remote.push_fetch(Err(RemoteError::Network("down".into())));
        remote.push_fetch(Err(RemoteError::Network("down".into())));
        let (sync, _working_copy) = sync_loop(&remote, Duration::from_secs(60));
        let sync = sync.with_failure_threshold(Some(2));
        let status = sync.status();

        sync.run_iteration().await;
        sync.run_iteration().await;
        assert_eq!(status.borrow().consecutive_failures, 2);

        sync.run_iteration().await;
        assert_eq!(status.borrow().consecutive_failures, 0);
        assert_eq!(status.borrow().iterations, 3);
    }

    // ── Loop lifecycle (paused clock) ───────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn bare_repository_stops_the_loop() {
        let remote = Arc::new(MockRemote::default());
        *remote.worktree.lock().unwrap() = Some(RemoteError::BareRepository);
        let (sync, _working_copy) = sync_loop(&remote, Duration::from_secs(60));
        let status = sync.status();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        sync.run(shutdown_rx).await;

        assert_eq!(status.borrow().state, LoopState::Stopped);
        assert_eq!(remote.fetch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_first_tick_skips_sync() {
        let remote = Arc::new(MockRemote::default());
        let (sync, _working_copy) = sync_loop(&remote, Duration::from_secs(3600));
        let status = sync.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sync.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1800)).await;
        shutdown_tx.send(true).unwrap();

        task.await.unwrap();
        assert_eq!(remote.fetch_calls(), 0);
        assert_eq!(status.borrow().state, LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_interval_until_shutdown() {
        let interval = Duration::from_secs(60);
        let remote = Arc::new(MockRemote::default());
        let (sync, _working_copy) = sync_loop(&remote, interval);
        let mut status = sync.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let task = tokio::spawn(sync.run(shutdown_rx));
        wait_for_iterations(&mut status, 3).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= interval * 3, "three ticks took only {elapsed:?}");
        assert!(elapsed < interval * 4, "ticks were delayed to {elapsed:?}");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        let calls = remote.fetch_calls();
        tokio::time::sleep(interval * 10).await;
        assert_eq!(remote.fetch_calls(), calls, "no iterations after shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_the_loop() {
        let remote = Arc::new(MockRemote::default());
        let (sync, _working_copy) = sync_loop(&remote, Duration::from_secs(3600));
        let status = sync.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sync.run(shutdown_rx));
        drop(shutdown_tx);

        task.await.unwrap();
        assert_eq!(status.borrow().state, LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_iterations_never_overlap() {
        let remote = Arc::new(MockRemote {
            fetch_delay: Duration::from_millis(5),
            ..MockRemote::default()
        });
        let (sync, _working_copy) = sync_loop(&remote, Duration::from_millis(1));
        let mut status = sync.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sync.run(shutdown_rx));
        wait_for_iterations(&mut status, 4).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(remote.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_is_visible_through_status_channel() {
        let remote = Arc::new(MockRemote::default());
        remote.push_fetch(Ok(FetchOutcome::Updated { target: "bbb".into() }));
        remote.push_pull(Ok(snapshot("bbb", "new")));
        let (sync, working_copy) = sync_loop(&remote, Duration::from_secs(60));
        let mut status = sync.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sync.run(shutdown_rx));
        status
            .wait_for(|status| status.commit.as_deref() == Some("bbb"))
            .await
            .expect("sync loop should still be running");

        assert_eq!(working_copy.commit_id().as_deref(), Some("bbb"));
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
