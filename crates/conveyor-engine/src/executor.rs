//! Job execution: stage commands in order, fail-fast.

use crate::joblog::JobLog;
use crate::table::JobTable;
use chrono::Utc;
use conveyor_core::events::{JobEvent, StageCompletedPayload, StageStartedPayload};
use conveyor_core::job::{Job, JobStatus, StageResult, StageStatus};
use conveyor_core::worker::Worker;
use conveyor_core::Error;
use conveyor_runner::{CommandContext, CommandRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs a job's commands on an acquired worker.
pub struct JobExecutor {
    runner: Arc<dyn CommandRunner>,
    events: broadcast::Sender<JobEvent>,
    log_dir: Option<PathBuf>,
}

/// How a job's command sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub status: JobStatus,
    pub failure: Option<String>,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        events: broadcast::Sender<JobEvent>,
        log_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            runner,
            events,
            log_dir,
        }
    }

    /// Run every command of `job` on `worker`, stopping at the first
    /// failure. Stage results are appended to `job.stages` and stored in
    /// `table` as each stage starts and ends.
    pub async fn execute(
        &self,
        job: &mut Job,
        worker: &Worker,
        cancel: &CancellationToken,
        table: &JobTable,
    ) -> Execution {
        let mut log = match &self.log_dir {
            Some(dir) => JobLog::create(dir, job).await,
            None => JobLog::disabled(),
        };
        let total = job.commands.len();
        let mut execution = Execution {
            status: JobStatus::Success,
            failure: None,
        };

        for (index, command) in job.commands.clone().into_iter().enumerate() {
            job.current_stage = index;

            if cancel.is_cancelled() {
                execution.status = JobStatus::Cancelled;
                break;
            }
            table.update(job).await;

            info!(
                job_id = %job.id,
                stage = %command.name,
                index,
                total,
                "Running stage"
            );
            self.publish(JobEvent::StageStarted(StageStartedPayload {
                job_id: job.id,
                stage: command.name.clone(),
                stage_index: index,
                command: command.command_line(),
                started_at: Utc::now(),
            }));
            log.command(&command).await;

            let started = std::time::Instant::now();
            let ctx = CommandContext::new(command.clone(), worker.clone());
            let result = self.runner.run(&ctx, cancel.clone(), None).await;

            let stage = match result {
                Ok(result) => {
                    log.output(&result.output).await;
                    if result.success {
                        StageResult {
                            name: command.name.clone(),
                            status: StageStatus::Success,
                            exit_code: Some(result.exit_code),
                            output: result.output,
                            duration_ms: result.duration_ms,
                        }
                    } else {
                        log.failure(result.exit_code).await;
                        warn!(
                            job_id = %job.id,
                            stage = %command.name,
                            exit_code = result.exit_code,
                            "Stage failed"
                        );
                        execution.status = JobStatus::Failure;
                        execution.failure = Some(
                            Error::StageFailed {
                                stage: command.name.clone(),
                                exit_code: result.exit_code,
                            }
                            .to_string(),
                        );
                        StageResult {
                            name: command.name.clone(),
                            status: StageStatus::Failure,
                            exit_code: Some(result.exit_code),
                            output: result.output,
                            duration_ms: result.duration_ms,
                        }
                    }
                }
                Err(Error::Cancelled) => {
                    log.error("cancelled").await;
                    info!(job_id = %job.id, stage = %command.name, "Stage cancelled");
                    execution.status = JobStatus::Cancelled;
                    StageResult {
                        name: command.name.clone(),
                        status: StageStatus::Cancelled,
                        exit_code: None,
                        output: String::new(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
                Err(e) => {
                    log.error(&e.to_string()).await;
                    error!(
                        job_id = %job.id,
                        stage = %command.name,
                        error = %e,
                        "Stage could not complete"
                    );
                    execution.status = JobStatus::Failure;
                    execution.failure = Some(e.to_string());
                    StageResult {
                        name: command.name.clone(),
                        status: StageStatus::Failure,
                        exit_code: None,
                        output: e.to_string(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
            };

            self.publish(JobEvent::StageCompleted(StageCompletedPayload {
                job_id: job.id,
                stage: stage.name.clone(),
                stage_index: index,
                status: stage.status,
                exit_code: stage.exit_code,
                duration_ms: stage.duration_ms,
                completed_at: Utc::now(),
            }));
            let passed = stage.status == StageStatus::Success;
            job.stages.push(stage);
            table.update(job).await;

            if !passed {
                break;
            }
        }

        log.summary(job.passed_stages(), total).await;
        execution
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
