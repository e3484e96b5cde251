//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external adapters.

use crate::change::ChangeEvent;
use crate::ids::JobId;
use crate::job::Job;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Anything that accepts jobs for execution.
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Enqueue a job. Returns once the job is accepted, not once it finishes.
    async fn submit(&self, job: Job) -> Result<JobId>;
}

/// Source of change events (VCS poller, webhook receiver, file replay).
#[async_trait]
pub trait ChangeSource: Send {
    /// Next change, or `None` once the source is exhausted.
    async fn next_change(&mut self) -> Result<Option<ChangeEvent>>;
}

/// External status sink, e.g. a commit-status API.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &str;

    /// Deliver one status update.
    async fn push(&self, update: &StatusUpdate) -> Result<()>;
}

/// A status push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub job_id: JobId,
    /// `ci/<builder-name>`.
    pub context: String,
    pub state: StatusState,
    pub description: String,
    pub target_url: Option<String>,
    pub repository: String,
    pub revision: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Started,
    Success,
    Failure,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Started => "started",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        }
    }
}
