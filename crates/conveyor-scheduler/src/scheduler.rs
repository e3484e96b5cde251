//! Scheduler set built from the master configuration.

use crate::change::ChangeScheduler;
use crate::filter::{ChangeFilter, is_same_repo_pull_request};
use crate::trigger::TriggerScheduler;
use conveyor_core::Result;
use conveyor_core::change::ChangeEvent;
use conveyor_core::config::{BuilderSpec, MasterConfig};
use conveyor_core::ports::JobSink;
use std::sync::Arc;
use tracing::{debug, info};

/// A scheduler: something that turns an external signal into jobs.
pub enum Scheduler {
    Change(ChangeScheduler),
    Trigger(TriggerScheduler),
}

impl Scheduler {
    pub fn name(&self) -> &str {
        match self {
            Scheduler::Change(s) => s.name(),
            Scheduler::Trigger(s) => s.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scheduler::Change(_) => "change",
            Scheduler::Trigger(_) => "trigger",
        }
    }

    /// Names of the builders or testers this scheduler fires.
    pub fn fires(&self) -> Vec<&str> {
        match self {
            Scheduler::Change(s) => s.builders().iter().map(String::as_str).collect(),
            Scheduler::Trigger(s) => s.testers().collect(),
        }
    }
}

/// All schedulers of a master.
pub struct SchedulerSet {
    schedulers: Vec<Scheduler>,
    base_repository: Option<String>,
}

impl SchedulerSet {
    /// One change scheduler per distinct (category, branch) pair of
    /// builders and one trigger scheduler per product type with testers.
    ///
    /// Spawns the change schedulers' debounce loops, so it must be called
    /// inside a Tokio runtime.
    pub fn from_config(config: &MasterConfig, sink: Arc<dyn JobSink>) -> Result<Self> {
        let mut groups: Vec<((Option<String>, String), Vec<BuilderSpec>)> = Vec::new();
        for builder in &config.builders {
            let key = (builder.category.clone(), builder.branch.clone());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, builders)) => builders.push(builder.clone()),
                None => groups.push((key, vec![builder.clone()])),
            }
        }

        let mut schedulers = Vec::new();
        for (index, ((category, branch), builders)) in groups.into_iter().enumerate() {
            let name = match &category {
                Some(category) => format!("change-{}-{}", category, index),
                None => format!("change-{}", index),
            };
            let filter = ChangeFilter::new(category, &branch)?;
            schedulers.push(Scheduler::Change(ChangeScheduler::spawn(
                name,
                filter,
                builders,
                config.build.clone(),
                config.timers.tree_stable_timer(),
                Arc::clone(&sink),
            )));
        }

        let mut product_types: Vec<&str> = Vec::new();
        for tester in &config.testers {
            if !product_types.contains(&tester.product_type.as_str()) {
                product_types.push(&tester.product_type);
            }
        }
        for product_type in product_types {
            let testers = config.testers_for(product_type).cloned().collect();
            schedulers.push(Scheduler::Trigger(TriggerScheduler::new(
                product_type,
                testers,
                config.build.clone(),
            )));
        }

        for scheduler in &schedulers {
            info!(
                scheduler = scheduler.name(),
                kind = scheduler.kind(),
                fires = ?scheduler.fires(),
                "Scheduler configured"
            );
        }

        Ok(Self {
            schedulers,
            base_repository: config.base_repository.clone(),
        })
    }

    /// Route a change to every change scheduler.
    ///
    /// Returns how many schedulers accepted it. Pull requests from the
    /// base repository itself are dropped.
    pub fn dispatch(&self, change: &ChangeEvent) -> usize {
        if is_same_repo_pull_request(change, self.base_repository.as_deref()) {
            debug!(
                branch = %change.branch,
                revision = %change.revision,
                "Ignoring pull request from the base repository"
            );
            return 0;
        }

        let accepted = self
            .change_schedulers()
            .filter(|s| s.offer(change))
            .count();
        if accepted == 0 {
            debug!(
                branch = %change.branch,
                category = ?change.category,
                "No scheduler matched change"
            );
        }
        accepted
    }

    pub fn trigger_for(&self, product_type: &str) -> Option<&TriggerScheduler> {
        self.schedulers.iter().find_map(|s| match s {
            Scheduler::Trigger(t) if t.product_type() == product_type => Some(t),
            _ => None,
        })
    }

    pub fn change_schedulers(&self) -> impl Iterator<Item = &ChangeScheduler> {
        self.schedulers.iter().filter_map(|s| match s {
            Scheduler::Change(c) => Some(c),
            Scheduler::Trigger(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    /// Let pending debounce windows fire, then stop the change schedulers.
    pub async fn close(&self) {
        for scheduler in self.change_schedulers() {
            scheduler.close().await;
        }
    }

    /// Stop the change schedulers without firing pending windows.
    pub fn abort(&self) {
        for scheduler in self.change_schedulers() {
            scheduler.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::change::PullRequest;
    use conveyor_core::config::{TestStep, TesterSpec};
    use conveyor_core::ids::JobId;
    use conveyor_core::job::Job;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Job sink that records submissions, optionally gated.
    pub struct RecordingSink {
        jobs: Mutex<Vec<Job>>,
        gate: Semaphore,
    }

    impl Default for RecordingSink {
        fn default() -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
            }
        }
    }

    impl RecordingSink {
        pub fn blocked() -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
                gate: Semaphore::new(0),
            }
        }

        pub fn unblock(&self) {
            self.gate.add_permits(1024);
        }

        pub fn jobs(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn submit(&self, job: Job) -> Result<JobId> {
            let _permit = self.gate.acquire().await.unwrap();
            let id = job.id;
            self.jobs.lock().unwrap().push(job);
            Ok(id)
        }
    }

    pub fn builder(name: &str, branch: &str, product_type: &str) -> BuilderSpec {
        BuilderSpec {
            name: name.into(),
            branch: branch.into(),
            category: None,
            product_type: product_type.into(),
            build_type: "release".into(),
            pool: "linux".into(),
            conf_file: "conf_linux_public.py".into(),
            api_latest: false,
            fastboot: false,
            compiler: "gcc".into(),
            compiler_version: String::new(),
        }
    }

    pub fn tester(name: &str, product_type: &str) -> TesterSpec {
        TesterSpec {
            name: name.into(),
            product_type: product_type.into(),
            build_type: "release".into(),
            pool: "linux".into(),
            steps: vec![TestStep {
                name: "smoke".into(),
                program: "python3".into(),
                args: vec!["smoke_test.py".into(), "${{ revision }}".into()],
            }],
        }
    }

    const CONFIG: &str = r#"
base_repository: org/product
workers:
  - id: linux-01
    pool: linux
builders:
  - name: build
    branch: master
    category: mediasdk
    product_type: linux
    pool: linux
    conf_file: conf_linux_public.py
  - name: build-api-latest
    branch: master
    category: mediasdk
    product_type: api_latest
    pool: linux
    conf_file: conf_linux_public.py
    api_latest: true
  - name: build-release
    branch: "release/.*"
    category: mediasdk
    product_type: linux
    pool: linux
    conf_file: conf_linux_public.py
testers:
  - name: test
    product_type: linux
    pool: linux
    steps:
      - name: smoke
        program: python3
        args: ["smoke_test.py"]
"#;

    fn config() -> MasterConfig {
        serde_yaml::from_str(CONFIG).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_groups_builders() {
        let set = SchedulerSet::from_config(&config(), Arc::new(RecordingSink::default())).unwrap();

        let changes: Vec<_> = set.change_schedulers().collect();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].builders(), ["build", "build-api-latest"]);
        assert_eq!(changes[1].builders(), ["build-release"]);

        assert!(set.trigger_for("linux").is_some());
        assert!(set.trigger_for("api_latest").is_none());
        assert_eq!(set.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_change_builds_once() {
        let sink = Arc::new(RecordingSink::default());
        let set = SchedulerSet::from_config(&config(), sink.clone()).unwrap();

        let change = ChangeEvent::new("https://github.com/org/product", "master", "abc")
            .with_category("mediasdk");
        assert_eq!(set.dispatch(&change), 1);
        tokio::time::sleep(Duration::from_secs(11)).await;

        let mut names: Vec<_> = sink
            .jobs()
            .into_iter()
            .map(|j| (j.spec_name, j.source.revision))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("build".to_string(), "abc".to_string()),
                ("build-api-latest".to_string(), "abc".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_repo_pull_request_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let set = SchedulerSet::from_config(&config(), sink.clone()).unwrap();

        let change = ChangeEvent::new("https://github.com/org/product", "master", "abc")
            .with_category("mediasdk")
            .with_pull_request(PullRequest {
                number: 42,
                head_repo: "org/product".into(),
                base_repo: Some("org/product".into()),
            });
        assert_eq!(set.dispatch(&change), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sink.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forked_pull_request_scheduled() {
        let sink = Arc::new(RecordingSink::default());
        let set = SchedulerSet::from_config(&config(), sink.clone()).unwrap();

        let change = ChangeEvent::new("https://github.com/alice/product", "master", "f00")
            .with_category("mediasdk")
            .with_pull_request(PullRequest {
                number: 43,
                head_repo: "alice/product".into(),
                base_repo: Some("org/product".into()),
            });
        assert_eq!(set.dispatch(&change), 1);
        set.close().await;
        assert_eq!(sink.jobs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_branch_filter_rejected() {
        let mut config = config();
        config.builders[0].branch = "(".into();
        let result = SchedulerSet::from_config(&config, Arc::new(RecordingSink::default()));
        assert!(result.is_err());
    }
}
