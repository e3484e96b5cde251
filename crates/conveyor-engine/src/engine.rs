//! Build engine: job lifecycle from submission to terminal state.

use crate::executor::JobExecutor;
use crate::table::JobTable;
use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::change::{ChangeEvent, SourceStamp};
use conveyor_core::config::MasterConfig;
use conveyor_core::events::{JobCancelledPayload, JobEvent, JobStartedPayload};
use conveyor_core::ids::JobId;
use conveyor_core::job::{Job, JobStatus, TriggerReason};
use conveyor_core::ports::JobSink;
use conveyor_core::{Error, Result};
use conveyor_notify::StatusReporter;
use conveyor_runner::CommandRunner;
use conveyor_scheduler::{SchedulerSet, WorkerPool};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Owns the worker pool, the schedulers and every job's lifecycle.
pub struct BuildEngine {
    me: Weak<BuildEngine>,
    config: Arc<MasterConfig>,
    pool: Arc<WorkerPool>,
    executor: JobExecutor,
    reporter: StatusReporter,
    events: broadcast::Sender<JobEvent>,
    jobs: JobTable,
    schedulers: OnceLock<SchedulerSet>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Job sink that does not keep the engine alive.
struct EngineSink(Weak<BuildEngine>);

#[async_trait]
impl JobSink for EngineSink {
    async fn submit(&self, job: Job) -> Result<JobId> {
        match self.0.upgrade() {
            Some(engine) => engine.submit(job).await,
            None => Err(Error::Internal("build engine stopped".to_string())),
        }
    }
}

impl BuildEngine {
    /// Validate `config`, register its workers and start its schedulers.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: Arc<MasterConfig>,
        runner: Arc<dyn CommandRunner>,
        reporter: StatusReporter,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::from_workers(config.workers.iter().cloned())?);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let executor = JobExecutor::new(runner, events.clone(), config.log_dir.clone());
        let jobs = JobTable::new(config.job_history);

        let engine = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            pool,
            executor,
            reporter,
            events,
            jobs,
            schedulers: OnceLock::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        let sink: Arc<dyn JobSink> = Arc::new(EngineSink(Arc::downgrade(&engine)));
        let schedulers = SchedulerSet::from_config(&engine.config, sink)?;
        let _ = engine.schedulers.set(schedulers);

        info!(
            workers = engine.config.workers.len(),
            builders = engine.config.builders.len(),
            testers = engine.config.testers.len(),
            "Build engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn schedulers(&self) -> Option<&SchedulerSet> {
        self.schedulers.get()
    }

    /// Lifecycle events of every job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Route a change event to the change schedulers.
    pub fn dispatch(&self, change: &ChangeEvent) -> usize {
        self.schedulers().map_or(0, |s| s.dispatch(change))
    }

    /// Queue a job and return at once; it runs in the background.
    pub async fn submit(&self, job: Job) -> Result<JobId> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("build engine is shutting down".to_string()));
        }
        let engine = self
            .me
            .upgrade()
            .ok_or_else(|| Error::Internal("build engine stopped".to_string()))?;

        let (job_id, cancel) = self.register(&job).await?;
        self.tracker.spawn(async move {
            engine.execute(job, cancel).await;
        });
        Ok(job_id)
    }

    /// Run a job to its terminal state and return it.
    pub async fn run(&self, job: Job) -> Result<Job> {
        let (_, cancel) = self.register(&job).await?;
        Ok(self.execute(job, cancel).await)
    }

    /// Build one builder for an explicit source stamp, skipping debounce.
    pub async fn force(
        &self,
        builder: &str,
        source: SourceStamp,
        actor: Option<String>,
    ) -> Result<JobId> {
        let spec = self
            .config
            .builder(builder)
            .ok_or_else(|| Error::BuilderNotFound(builder.to_string()))?;
        let job = Job::build(spec, source, &self.config.build, TriggerReason::Manual { actor })?;
        info!(
            builder,
            job_id = %job.id,
            revision = %job.source.short_revision(),
            "Forced build"
        );
        self.submit(job).await
    }

    /// Cancel a queued or running job. Returns `false` if it is unknown
    /// or already finished.
    pub async fn cancel(&self, job_id: JobId) -> bool {
        let cancelled = self.jobs.cancel(job_id).await;
        if cancelled {
            info!(job_id = %job_id, "Cancelling job");
        }
        cancelled
    }

    /// Snapshot of a job. Finished jobs stay visible, without their
    /// captured output, until `job_history` newer ones have finished.
    pub async fn status(&self, job_id: JobId) -> Option<Job> {
        self.jobs.get(job_id).await
    }

    /// Snapshots of every running and retained job, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.snapshot().await
    }

    /// Wait until every submitted job, including triggered ones, is done.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop the schedulers, cancel every job and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down build engine");
        if let Some(schedulers) = self.schedulers() {
            schedulers.abort();
        }
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn register(&self, job: &Job) -> Result<(JobId, CancellationToken)> {
        self.pool.validate_pool(&job.pool)?;
        let cancel = self.shutdown.child_token();
        self.jobs.insert(job, cancel.clone()).await;
        debug!(job_id = %job.id, spec = %job.spec_name, pool = %job.pool, "Job queued");
        self.publish(JobEvent::queued(job));
        Ok((job.id, cancel))
    }

    async fn execute(&self, mut job: Job, cancel: CancellationToken) -> Job {
        let wait = self.config.timers.worker_wait_timeout();
        let lease = match self.pool.acquire(&job.pool, wait, &cancel).await {
            Ok(lease) => lease,
            Err(Error::Cancelled) => {
                job.finish(JobStatus::Cancelled, None);
                return self.complete(job).await;
            }
            Err(e) => {
                warn!(job_id = %job.id, spec = %job.spec_name, error = %e, "No worker for job");
                job.finish(JobStatus::Failure, Some(e.to_string()));
                return self.complete(job).await;
            }
        };

        job.mark_running(lease.id().clone());
        self.jobs.update(&job).await;
        info!(job_id = %job.id, spec = %job.spec_name, worker = %lease.id(), "Job started");
        self.publish(JobEvent::JobStarted(JobStartedPayload {
            job_id: job.id,
            spec_name: job.spec_name.clone(),
            worker: lease.id().clone(),
            started_at: Utc::now(),
        }));
        self.reporter.on_job_start(&job).await;

        let execution = self
            .executor
            .execute(&mut job, lease.worker(), &cancel, &self.jobs)
            .await;
        drop(lease);
        job.finish(execution.status, execution.failure);

        let job = self.complete(job).await;
        if job.status == JobStatus::Success && job.is_build() {
            self.fire_triggers(&job);
        }
        job
    }

    /// Archive, announce and report a terminal job.
    async fn complete(&self, job: Job) -> Job {
        self.jobs.archive(&job).await;

        match job.status {
            JobStatus::Success => info!(
                job_id = %job.id,
                spec = %job.spec_name,
                duration_ms = ?job.duration_ms(),
                "Job succeeded"
            ),
            JobStatus::Cancelled => {
                info!(job_id = %job.id, spec = %job.spec_name, "Job cancelled")
            }
            _ => warn!(
                job_id = %job.id,
                spec = %job.spec_name,
                failure = ?job.failure,
                "Job failed"
            ),
        }

        if job.status == JobStatus::Cancelled {
            self.publish(JobEvent::JobCancelled(JobCancelledPayload {
                job_id: job.id,
                spec_name: job.spec_name.clone(),
                stage: job.stages.last().map(|s| s.name.clone()),
                cancelled_at: Utc::now(),
            }));
        }
        self.publish(JobEvent::completed(&job));
        self.reporter.on_job_end(&job).await;
        job
    }

    fn fire_triggers(&self, job: &Job) {
        let trigger = self
            .schedulers()
            .and_then(|s| s.trigger_for(&job.product_type));
        let Some(trigger) = trigger else {
            debug!(
                job_id = %job.id,
                product_type = %job.product_type,
                "No testers for product type"
            );
            return;
        };
        let sink: Arc<dyn JobSink> = Arc::new(EngineSink(self.me.clone()));
        let fired = trigger.fire(job, sink, &self.tracker);
        if fired.is_empty() {
            error!(job_id = %job.id, scheduler = trigger.name(), "Trigger scheduler fired no jobs");
        }
    }

    fn publish(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl JobSink for BuildEngine {
    async fn submit(&self, job: Job) -> Result<JobId> {
        BuildEngine::submit(self, job).await
    }
}
