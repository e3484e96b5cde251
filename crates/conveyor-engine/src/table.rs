//! In-memory job table: live jobs plus a bounded archive of finished ones.

use conveyor_core::ids::JobId;
use conveyor_core::job::Job;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Jobs known to the engine, shared with the executor so stage progress
/// is visible while a job runs.
pub struct JobTable {
    inner: RwLock<Inner>,
    history: usize,
}

#[derive(Default)]
struct Inner {
    live: HashMap<JobId, LiveJob>,
    archive: VecDeque<Job>,
}

struct LiveJob {
    job: Job,
    cancel: CancellationToken,
}

impl JobTable {
    /// Keep at most `history` finished jobs.
    pub fn new(history: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history,
        }
    }

    pub async fn insert(&self, job: &Job, cancel: CancellationToken) {
        self.inner.write().await.live.insert(
            job.id,
            LiveJob {
                job: job.clone(),
                cancel,
            },
        );
    }

    /// Replace the snapshot of a live job. Unknown or archived jobs are
    /// left alone.
    pub async fn update(&self, job: &Job) {
        if let Some(entry) = self.inner.write().await.live.get_mut(&job.id) {
            entry.job = job.clone();
        }
    }

    /// Move a finished job to the archive without its captured output.
    pub async fn archive(&self, job: &Job) {
        let mut archived = job.clone();
        for stage in &mut archived.stages {
            stage.output = String::new();
        }

        let mut inner = self.inner.write().await;
        inner.live.remove(&job.id);
        if self.history == 0 {
            return;
        }
        inner.archive.push_back(archived);
        while inner.archive.len() > self.history {
            if let Some(evicted) = inner.archive.pop_front() {
                debug!(job_id = %evicted.id, "Job dropped from history");
            }
        }
    }

    /// Signal cancellation to a live job. Returns `false` if it is not live.
    pub async fn cancel(&self, job_id: JobId) -> bool {
        let inner = self.inner.read().await;
        match inner.live.get(&job_id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        let inner = self.inner.read().await;
        inner
            .live
            .get(&job_id)
            .map(|e| e.job.clone())
            .or_else(|| inner.archive.iter().rev().find(|j| j.id == job_id).cloned())
    }

    /// Live and archived jobs, oldest first.
    pub async fn snapshot(&self) -> Vec<Job> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .live
            .values()
            .map(|e| e.job.clone())
            .chain(inner.archive.iter().cloned())
            .collect();
        jobs.sort_by_key(|j| j.queued_at);
        jobs
    }
}
