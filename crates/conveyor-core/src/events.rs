//! Job lifecycle events.

use crate::change::SourceStamp;
use crate::ids::{JobId, WorkerId};
use crate::job::{Job, JobKind, JobStatus, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All lifecycle events emitted by the build engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobQueued(JobQueuedPayload),
    JobStarted(JobStartedPayload),
    StageStarted(StageStartedPayload),
    StageCompleted(StageCompletedPayload),
    JobCompleted(JobCompletedPayload),
    JobCancelled(JobCancelledPayload),
}

impl JobEvent {
    /// Dotted subject for routing and log correlation.
    pub fn subject(&self) -> String {
        match self {
            JobEvent::JobQueued(p) => format!("job.{}.queued", p.job_id),
            JobEvent::JobStarted(p) => format!("job.{}.started", p.job_id),
            JobEvent::StageStarted(p) => format!("job.{}.stage.{}.started", p.job_id, p.stage),
            JobEvent::StageCompleted(p) => {
                format!("job.{}.stage.{}.completed", p.job_id, p.stage)
            }
            JobEvent::JobCompleted(p) => format!("job.{}.completed", p.job_id),
            JobEvent::JobCancelled(p) => format!("job.{}.cancelled", p.job_id),
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobQueued(p) => p.job_id,
            JobEvent::JobStarted(p) => p.job_id,
            JobEvent::StageStarted(p) => p.job_id,
            JobEvent::StageCompleted(p) => p.job_id,
            JobEvent::JobCompleted(p) => p.job_id,
            JobEvent::JobCancelled(p) => p.job_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueuedPayload {
    pub job_id: JobId,
    pub kind: JobKind,
    pub spec_name: String,
    pub source: SourceStamp,
    pub parent: Option<JobId>,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub job_id: JobId,
    pub spec_name: String,
    pub worker: WorkerId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStartedPayload {
    pub job_id: JobId,
    pub stage: String,
    pub stage_index: usize,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCompletedPayload {
    pub job_id: JobId,
    pub stage: String,
    pub stage_index: usize,
    pub status: StageStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedPayload {
    pub job_id: JobId,
    pub spec_name: String,
    pub status: JobStatus,
    pub stages_passed: usize,
    pub stages_total: usize,
    pub failure: Option<String>,
    pub duration_ms: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCancelledPayload {
    pub job_id: JobId,
    pub spec_name: String,
    pub stage: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn queued(job: &Job) -> Self {
        JobEvent::JobQueued(JobQueuedPayload {
            job_id: job.id,
            kind: job.kind,
            spec_name: job.spec_name.clone(),
            source: job.source.clone(),
            parent: job.parent,
            queued_at: job.queued_at,
        })
    }

    pub fn completed(job: &Job) -> Self {
        JobEvent::JobCompleted(JobCompletedPayload {
            job_id: job.id,
            spec_name: job.spec_name.clone(),
            status: job.status,
            stages_passed: job.passed_stages(),
            stages_total: job.commands.len(),
            failure: job.failure.clone(),
            duration_ms: job.duration_ms(),
            completed_at: job.completed_at.unwrap_or_else(Utc::now),
        })
    }
}
