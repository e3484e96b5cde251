//! Status reporter: job lifecycle to status updates.

use crate::sinks::{NotifyError, create_sink};
use conveyor_core::config::MasterConfig;
use conveyor_core::job::{Job, JobKind, JobStatus};
use conveyor_core::ports::{StatusSink, StatusState, StatusUpdate};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pushes job status to every configured sink.
#[derive(Clone, Default)]
pub struct StatusReporter {
    sinks: Vec<Arc<dyn StatusSink>>,
    status_url: Option<String>,
}

impl StatusReporter {
    pub fn new(sinks: Vec<Arc<dyn StatusSink>>) -> Self {
        Self {
            sinks,
            status_url: None,
        }
    }

    /// Reporter with no sinks; every push is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MasterConfig) -> Result<Self, NotifyError> {
        let sinks = config
            .reporters
            .iter()
            .map(create_sink)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sinks,
            status_url: config.status_url.clone(),
        })
    }

    /// Base URL for `target_url` links, `<url>/jobs/<id>`.
    pub fn with_status_url(mut self, url: impl Into<String>) -> Self {
        self.status_url = Some(url.into());
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn on_job_start(&self, job: &Job) {
        let description = match job.kind {
            JobKind::Build => format!("Build started on {}", worker_name(job)),
            JobKind::Test => format!("Test started on {}", worker_name(job)),
        };
        self.report(job, StatusState::Started, description).await;
    }

    /// Cancelled jobs report as failures.
    pub async fn on_job_end(&self, job: &Job) {
        let total = job.commands.len();
        let passed = job.passed_stages();
        let (state, description) = match job.status {
            JobStatus::Success => (
                StatusState::Success,
                format!("Passed {} of {} stages", passed, total),
            ),
            JobStatus::Cancelled => (StatusState::Failure, "Cancelled".to_string()),
            _ => (
                StatusState::Failure,
                job.failure
                    .clone()
                    .unwrap_or_else(|| format!("Passed {} of {} stages", passed, total)),
            ),
        };
        self.report(job, state, description).await;
    }

    /// The update a sink would receive.
    pub fn update_for(&self, job: &Job, state: StatusState, description: String) -> StatusUpdate {
        StatusUpdate {
            job_id: job.id,
            context: job.context(),
            state,
            description,
            target_url: self
                .status_url
                .as_ref()
                .map(|base| format!("{}/jobs/{}", base.trim_end_matches('/'), job.id)),
            repository: job.source.repository.clone(),
            revision: job.source.revision.clone(),
        }
    }

    async fn report(&self, job: &Job, state: StatusState, description: String) {
        if self.sinks.is_empty() {
            return;
        }
        let update = self.update_for(job, state, description);

        let results = join_all(self.sinks.iter().map(|sink| sink.push(&update))).await;
        for (sink, result) in self.sinks.iter().zip(results) {
            match result {
                Ok(()) => debug!(
                    sink = sink.name(),
                    job_id = %job.id,
                    state = state.as_str(),
                    "Status pushed"
                ),
                Err(e) => warn!(
                    sink = sink.name(),
                    job_id = %job.id,
                    context = %update.context,
                    error = %e,
                    "Status push failed"
                ),
            }
        }
    }
}

fn worker_name(job: &Job) -> &str {
    job.worker.as_ref().map(|w| w.as_str()).unwrap_or("unassigned")
}
