//! Debounced change scheduler.

use crate::filter::ChangeFilter;
use conveyor_core::change::ChangeEvent;
use conveyor_core::config::{BuildSettings, BuilderSpec};
use conveyor_core::job::{Job, TriggerReason};
use conveyor_core::ports::JobSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Observable state of a change scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// At least one matching change is waiting for the tree to settle.
    Debouncing,
    /// Submitting build jobs for the settled change.
    Fired,
}

/// Fires its builders once the tree has been quiet for the stability timer.
///
/// Every matching change restarts the timer. When it expires, one build job
/// per builder is submitted using the source stamp of the latest change.
pub struct ChangeScheduler {
    name: String,
    filter: ChangeFilter,
    builders: Vec<String>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
    state: watch::Receiver<SchedulerState>,
    fired: Arc<AtomicU64>,
    closing: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    abort: AbortHandle,
}

impl ChangeScheduler {
    /// Start the debounce loop. Must be called inside a Tokio runtime.
    pub fn spawn(
        name: impl Into<String>,
        filter: ChangeFilter,
        builders: Vec<BuilderSpec>,
        settings: BuildSettings,
        stable_timer: Duration,
        sink: Arc<dyn JobSink>,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let fired = Arc::new(AtomicU64::new(0));
        let closing = CancellationToken::new();
        let builder_names = builders.iter().map(|b| b.name.clone()).collect();

        let debounce = Debounce {
            name: name.clone(),
            builders,
            settings,
            stable_timer,
            sink,
            state: state_tx,
            fired: Arc::clone(&fired),
        };
        let task = tokio::spawn(debounce.run(rx, closing.clone()));
        let abort = task.abort_handle();

        info!(
            scheduler = %name,
            category = filter.category().unwrap_or("*"),
            branch = %filter.pattern(),
            stable_secs = stable_timer.as_secs(),
            "Change scheduler started"
        );

        Self {
            name,
            filter,
            builders: builder_names,
            tx,
            state,
            fired,
            closing,
            task: Mutex::new(Some(task)),
            abort,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub fn builders(&self) -> &[String] {
        &self.builders
    }

    /// Hand a change to the scheduler. Returns `true` if it matched.
    pub fn offer(&self, change: &ChangeEvent) -> bool {
        if !self.filter.matches(change) {
            return false;
        }
        debug!(
            scheduler = %self.name,
            branch = %change.branch,
            revision = %change.revision,
            "Change accepted"
        );
        self.tx.send(change.clone()).is_ok()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Number of settled windows that fired.
    pub fn fire_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Stop accepting changes, let a pending window settle and fire, then
    /// wait for the loop to exit.
    pub async fn close(&self) {
        self.closing.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Stop immediately, dropping any pending window.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

impl Drop for ChangeScheduler {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct Debounce {
    name: String,
    builders: Vec<BuilderSpec>,
    settings: BuildSettings,
    stable_timer: Duration,
    sink: Arc<dyn JobSink>,
    state: watch::Sender<SchedulerState>,
    fired: Arc<AtomicU64>,
}

impl Debounce {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<ChangeEvent>, closing: CancellationToken) {
        let timer = sleep(self.stable_timer);
        tokio::pin!(timer);
        let mut pending: Option<ChangeEvent> = None;
        let mut open = true;

        loop {
            tokio::select! {
                biased;

                _ = closing.cancelled(), if open => {
                    open = false;
                    // Changes offered before close still count.
                    while let Ok(change) = rx.try_recv() {
                        self.restart(&mut pending, timer.as_mut(), change);
                    }
                }
                change = rx.recv(), if open => match change {
                    Some(change) => self.restart(&mut pending, timer.as_mut(), change),
                    None => open = false,
                },
                _ = &mut timer, if pending.is_some() => {
                    if let Some(change) = pending.take() {
                        self.fire(&change).await;
                    }
                }
            }

            if !open && pending.is_none() {
                break;
            }
        }

        debug!(scheduler = %self.name, "Change scheduler stopped");
    }

    fn restart(
        &self,
        pending: &mut Option<ChangeEvent>,
        timer: std::pin::Pin<&mut tokio::time::Sleep>,
        change: ChangeEvent,
    ) {
        timer.reset(Instant::now() + self.stable_timer);
        if pending.is_none() {
            let _ = self.state.send(SchedulerState::Debouncing);
        }
        *pending = Some(change);
    }

    async fn fire(&self, change: &ChangeEvent) {
        let _ = self.state.send(SchedulerState::Fired);
        self.fired.fetch_add(1, Ordering::Relaxed);

        let source = change.source_stamp();
        info!(
            scheduler = %self.name,
            branch = %source.branch,
            revision = %source.short_revision(),
            builders = self.builders.len(),
            "Tree stable, firing builders"
        );

        for builder in &self.builders {
            let reason = TriggerReason::Change {
                scheduler: self.name.clone(),
            };
            let job = match Job::build(builder, source.clone(), &self.settings, reason) {
                Ok(job) => job,
                Err(e) => {
                    error!(
                        scheduler = %self.name,
                        builder = %builder.name,
                        error = %e,
                        "Failed to create build job"
                    );
                    continue;
                }
            };
            match self.sink.submit(job).await {
                Ok(job_id) => debug!(
                    scheduler = %self.name,
                    builder = %builder.name,
                    job_id = %job_id,
                    "Build submitted"
                ),
                Err(e) => error!(
                    scheduler = %self.name,
                    builder = %builder.name,
                    error = %e,
                    "Build submission rejected"
                ),
            }
        }

        let _ = self.state.send(SchedulerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::{RecordingSink, builder};
    use tokio::time::sleep;

    fn scheduler(sink: Arc<RecordingSink>) -> ChangeScheduler {
        ChangeScheduler::spawn(
            "change-master",
            ChangeFilter::new(None, "master").unwrap(),
            vec![builder("build", "master", "linux")],
            BuildSettings::default(),
            Duration::from_secs(10),
            sink,
        )
    }

    fn change(branch: &str, revision: &str) -> ChangeEvent {
        ChangeEvent::new("https://github.com/org/product", branch, revision)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_change_fires_once_after_window() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        assert!(scheduler.offer(&change("master", "abc")));
        sleep(Duration::from_secs(9)).await;
        assert_eq!(scheduler.state(), SchedulerState::Debouncing);
        assert!(sink.jobs().is_empty());

        sleep(Duration::from_secs(2)).await;
        let jobs = sink.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].spec_name, "build");
        assert_eq!(jobs[0].source.revision, "abc");
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.fire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_change_restarts_window() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        scheduler.offer(&change("master", "r1"));
        sleep(Duration::from_secs(5)).await;
        scheduler.offer(&change("master", "r2"));
        sleep(Duration::from_secs(5)).await;
        scheduler.offer(&change("master", "r3"));

        // 14s after the first change, 4s after the last: still settling.
        sleep(Duration::from_secs(4)).await;
        assert!(sink.jobs().is_empty());

        sleep(Duration::from_secs(7)).await;
        let jobs = sink.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source.revision, "r3");
        assert_eq!(scheduler.fire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_fire_separately() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        scheduler.offer(&change("master", "r1"));
        sleep(Duration::from_secs(11)).await;
        scheduler.offer(&change("master", "r2"));
        sleep(Duration::from_secs(11)).await;

        let revisions: Vec<_> = sink.jobs().into_iter().map(|j| j.source.revision).collect();
        assert_eq!(revisions, vec!["r1", "r2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_matching_change_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        assert!(!scheduler.offer(&change("feature/x", "abc")));
        sleep(Duration::from_secs(30)).await;
        assert!(sink.jobs().is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_ascii_revision_keeps_scheduler_alive() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        assert!(scheduler.offer(&change("master", "abcdefgé")));
        sleep(Duration::from_secs(11)).await;
        assert!(scheduler.offer(&change("master", "deadbeef")));
        sleep(Duration::from_secs(11)).await;

        let revisions: Vec<_> = sink.jobs().into_iter().map(|j| j.source.revision).collect();
        assert_eq!(revisions, vec!["abcdefgé", "deadbeef"]);
        assert_eq!(scheduler.fire_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_window() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        scheduler.offer(&change("master", "abc"));
        scheduler.close().await;

        assert_eq!(sink.jobs().len(), 1);
        assert!(!scheduler.offer(&change("master", "def")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_drops_pending_window() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(Arc::clone(&sink));

        scheduler.offer(&change("master", "abc"));
        tokio::task::yield_now().await;
        scheduler.abort();
        sleep(Duration::from_secs(30)).await;

        assert!(sink.jobs().is_empty());
    }
}
