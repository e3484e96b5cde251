//! Job and execution types.

use crate::change::SourceStamp;
use crate::config::{BuildSettings, BuilderSpec, TesterSpec};
use crate::ids::{JobId, WorkerId};
use crate::stage::{self, StageCommand};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One build or test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Builder or tester name.
    pub spec_name: String,
    pub pool: String,
    pub product_type: String,
    pub source: SourceStamp,
    pub commands: Vec<StageCommand>,
    pub status: JobStatus,
    /// Index of the stage currently running, or the next to run.
    pub current_stage: usize,
    pub stages: Vec<StageResult>,
    pub failure: Option<String>,
    pub worker: Option<WorkerId>,
    /// Build job that triggered this one.
    pub parent: Option<JobId>,
    pub reason: TriggerReason,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Build,
    Test,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Build => "build",
            JobKind::Test => "test",
        }
    }
}

/// Why a job was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerReason {
    Change { scheduler: String },
    Trigger { scheduler: String },
    Manual { actor: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one stage command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub exit_code: Option<i32>,
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failure,
    Cancelled,
}

impl Job {
    fn new(
        kind: JobKind,
        spec_name: &str,
        pool: &str,
        product_type: &str,
        source: SourceStamp,
        commands: Vec<StageCommand>,
        reason: TriggerReason,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            spec_name: spec_name.to_string(),
            pool: pool.to_string(),
            product_type: product_type.to_string(),
            source,
            commands,
            status: JobStatus::Pending,
            current_stage: 0,
            stages: Vec::new(),
            failure: None,
            worker: None,
            parent: None,
            reason,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a build job, resolving its stage commands.
    pub fn build(
        builder: &BuilderSpec,
        source: SourceStamp,
        settings: &BuildSettings,
        reason: TriggerReason,
    ) -> Result<Self> {
        let commands = stage::build_stages(builder, &source, settings)?;
        Ok(Self::new(
            JobKind::Build,
            &builder.name,
            &builder.pool,
            &builder.product_type,
            source,
            commands,
            reason,
        ))
    }

    /// Create a test job triggered by `parent`.
    pub fn test(
        tester: &TesterSpec,
        source: SourceStamp,
        settings: &BuildSettings,
        reason: TriggerReason,
        parent: Option<JobId>,
    ) -> Result<Self> {
        let commands = stage::test_steps(tester, &source, settings)?;
        let mut job = Self::new(
            JobKind::Test,
            &tester.name,
            &tester.pool,
            &tester.product_type,
            source,
            commands,
            reason,
        );
        job.parent = parent;
        Ok(job)
    }

    pub fn is_build(&self) -> bool {
        self.kind == JobKind::Build
    }

    /// Status context pushed upstream.
    pub fn context(&self) -> String {
        format!("ci/{}", self.spec_name)
    }

    pub fn passed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Success)
            .count()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds().max(0) as u64)
    }

    pub fn mark_running(&mut self, worker: WorkerId) {
        self.status = JobStatus::Running;
        self.worker = Some(worker);
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: JobStatus, failure: Option<String>) {
        self.status = status;
        self.failure = failure;
        self.completed_at = Some(Utc::now());
    }
}
