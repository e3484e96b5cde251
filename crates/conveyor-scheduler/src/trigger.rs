//! Trigger scheduler: test jobs fired by successful builds.

use conveyor_core::config::{BuildSettings, TesterSpec};
use conveyor_core::ids::JobId;
use conveyor_core::job::{Job, JobStatus, TriggerReason};
use conveyor_core::ports::JobSink;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Fires the testers of one product type.
pub struct TriggerScheduler {
    name: String,
    product_type: String,
    testers: Vec<TesterSpec>,
    settings: BuildSettings,
}

impl TriggerScheduler {
    pub fn new(
        product_type: impl Into<String>,
        testers: Vec<TesterSpec>,
        settings: BuildSettings,
    ) -> Self {
        let product_type = product_type.into();
        Self {
            name: format!("trigger-{}", product_type),
            product_type,
            testers,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn testers(&self) -> impl Iterator<Item = &str> {
        self.testers.iter().map(|t| t.name.as_str())
    }

    /// Whether a finished job should fire this scheduler.
    pub fn accepts(&self, parent: &Job) -> bool {
        parent.is_build()
            && parent.status == JobStatus::Success
            && parent.product_type == self.product_type
    }

    /// Submit one test job per tester for `parent`'s source stamp.
    ///
    /// Submissions run on `tracker` and never block the caller. Returns
    /// the ids of the jobs handed off.
    pub fn fire(&self, parent: &Job, sink: Arc<dyn JobSink>, tracker: &TaskTracker) -> Vec<JobId> {
        if !self.accepts(parent) {
            warn!(
                scheduler = %self.name,
                job_id = %parent.id,
                status = parent.status.as_str(),
                "Trigger ignored for job that is not a successful build of this product"
            );
            return Vec::new();
        }

        let mut fired = Vec::with_capacity(self.testers.len());
        for tester in &self.testers {
            let reason = TriggerReason::Trigger {
                scheduler: self.name.clone(),
            };
            let source = parent.source.clone();
            let job = match Job::test(tester, source, &self.settings, reason, Some(parent.id)) {
                Ok(job) => job,
                Err(e) => {
                    error!(
                        scheduler = %self.name,
                        tester = %tester.name,
                        error = %e,
                        "Failed to create test job"
                    );
                    continue;
                }
            };

            fired.push(job.id);
            let sink = Arc::clone(&sink);
            let tester = tester.name.clone();
            tracker.spawn(async move {
                if let Err(e) = sink.submit(job).await {
                    error!(tester = %tester, error = %e, "Test job submission rejected");
                }
            });
        }

        info!(
            scheduler = %self.name,
            parent = %parent.id,
            revision = %parent.source.short_revision(),
            jobs = fired.len(),
            "Fired test jobs"
        );
        fired
    }
}
