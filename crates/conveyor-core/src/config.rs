//! Master configuration.
//!
//! These types represent the operator-authored YAML configuration. The
//! configuration is loaded once at startup, validated, and then shared
//! immutably (behind an `Arc`) by every component.

use crate::change::SourceStamp;
use crate::stage;
use crate::worker::Worker;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub title: Option<String>,
    /// `owner/repo` of the main repository; pull requests whose head is
    /// this repository are ignored.
    #[serde(default)]
    pub base_repository: Option<String>,
    /// Base URL used to build status links (`<url>/jobs/<id>`).
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub timers: TimerSettings,
    /// Directory for per-job plain-text logs.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Finished jobs kept in memory for status queries, oldest dropped
    /// first. Their captured output is not kept; the job log has it.
    #[serde(default = "default_job_history")]
    pub job_history: usize,
    pub workers: Vec<Worker>,
    pub builders: Vec<BuilderSpec>,
    #[serde(default)]
    pub testers: Vec<TesterSpec>,
    #[serde(default)]
    pub reporters: Vec<ReporterConfig>,
}

fn default_job_history() -> usize {
    500
}

/// How build stage commands are assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Program and leading arguments, e.g. `["python3", "build_runner.py"]`.
    #[serde(default = "default_program")]
    pub program: Vec<String>,
    /// Root under which `<builder>` build directories live.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Subdirectory of the build directory passed as `--root-dir`.
    #[serde(default = "default_root_subdir")]
    pub root_subdir: String,
}

fn default_program() -> Vec<String> {
    vec!["python3".to_string(), "build_runner.py".to_string()]
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/var/lib/conveyor/work")
}

fn default_root_subdir() -> String {
    "build_dir".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            workdir: default_workdir(),
            root_subdir: default_root_subdir(),
        }
    }
}

impl BuildSettings {
    /// Build directory for a builder or tester.
    pub fn builddir(&self, name: &str) -> PathBuf {
        self.workdir.join(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    /// Quiet period after the last matching change before a build fires.
    #[serde(default = "default_tree_stable_timer")]
    pub tree_stable_timer_secs: u64,
    /// Poll interval handed to change-source adapters.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on queueing for a free worker.
    #[serde(default = "default_worker_wait")]
    pub worker_wait_timeout_secs: u64,
    /// Upper bound on a single stage command.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
}

fn default_tree_stable_timer() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    60
}

fn default_worker_wait() -> u64 {
    3600
}

fn default_stage_timeout() -> u64 {
    3 * 3600
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tree_stable_timer_secs: default_tree_stable_timer(),
            poll_interval_secs: default_poll_interval(),
            worker_wait_timeout_secs: default_worker_wait(),
            stage_timeout_secs: default_stage_timeout(),
        }
    }
}

impl TimerSettings {
    pub fn tree_stable_timer(&self) -> Duration {
        Duration::from_secs(self.tree_stable_timer_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn worker_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_wait_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Static description of a build job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderSpec {
    pub name: String,
    /// Regular expression matched against the whole branch name.
    #[serde(default = "default_branch_filter")]
    pub branch: String,
    #[serde(default)]
    pub category: Option<String>,
    pub product_type: String,
    #[serde(default = "default_build_type")]
    pub build_type: String,
    pub pool: String,
    pub conf_file: String,
    #[serde(default)]
    pub api_latest: bool,
    #[serde(default)]
    pub fastboot: bool,
    #[serde(default = "default_compiler")]
    pub compiler: String,
    #[serde(default)]
    pub compiler_version: String,
}

fn default_branch_filter() -> String {
    ".*".to_string()
}

fn default_build_type() -> String {
    "release".to_string()
}

fn default_compiler() -> String {
    "gcc".to_string()
}

/// Static description of a test job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesterSpec {
    pub name: String,
    pub product_type: String,
    #[serde(default = "default_build_type")]
    pub build_type: String,
    pub pool: String,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// One command of a tester, run in order with fail-fast semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Status sink configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReporterConfig {
    Github(GithubReporterConfig),
    Webhook(WebhookReporterConfig),
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubReporterConfig {
    #[serde(default = "default_github_api")]
    pub api_url: String,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_report_timeout")]
    pub timeout_seconds: u64,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_report_timeout() -> u64 {
    10
}

impl Default for GithubReporterConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
            token_env: default_token_env(),
            timeout_seconds: default_report_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReporterConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_report_timeout")]
    pub timeout_seconds: u64,
}

impl MasterConfig {
    pub fn builder(&self, name: &str) -> Option<&BuilderSpec> {
        self.builders.iter().find(|b| b.name == name)
    }

    pub fn tester(&self, name: &str) -> Option<&TesterSpec> {
        self.testers.iter().find(|t| t.name == name)
    }

    /// Testers a successful build of `product_type` triggers.
    pub fn testers_for<'a>(
        &'a self,
        product_type: &'a str,
    ) -> impl Iterator<Item = &'a TesterSpec> {
        self.testers.iter().filter(move |t| t.product_type == product_type)
    }

    pub fn pools(&self) -> HashSet<&str> {
        self.workers.iter().map(|w| w.pool.as_str()).collect()
    }

    /// Check everything that would otherwise fail at dispatch time.
    pub fn validate(&self) -> Result<()> {
        unique("worker", self.workers.iter().map(|w| w.id.as_str()))?;
        unique(
            "job spec",
            self.builders
                .iter()
                .map(|b| b.name.as_str())
                .chain(self.testers.iter().map(|t| t.name.as_str())),
        )?;

        if self.build.program.is_empty() {
            return Err(Error::InvalidConfig("build.program must not be empty".into()));
        }

        let pools = self.pools();
        for builder in &self.builders {
            if !pools.contains(builder.pool.as_str()) {
                return Err(Error::UnknownPool(builder.pool.clone()));
            }
            compile_branch_filter(&builder.branch)?;
        }
        for tester in &self.testers {
            if !pools.contains(tester.pool.as_str()) {
                return Err(Error::UnknownPool(tester.pool.clone()));
            }
            if tester.steps.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "test case is empty for tester `{}`",
                    tester.name
                )));
            }
        }

        // Dry-run every template so unresolved properties surface now.
        let sample = SourceStamp::new("https://example.invalid/org/repo.git", "branch", "0");
        for builder in &self.builders {
            stage::build_stages(builder, &sample, &self.build)?;
        }
        for tester in &self.testers {
            stage::test_steps(tester, &sample, &self.build)?;
        }

        Ok(())
    }
}

/// Compile a branch filter anchored to the whole branch name.
pub fn compile_branch_filter(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Error::InvalidBranchFilter {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
base_repository: org/product
workers:
  - id: gcc-01
    pool: linux
    properties:
      compiler: gcc
builders:
  - name: build
    branch: master
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
        args: ["smoke_test.py", "--revision", "${{ revision }}"]
"#;

    fn sample() -> MasterConfig {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert_eq!(config.timers.tree_stable_timer_secs, 10);
        assert_eq!(config.timers.worker_wait_timeout_secs, 3600);
        assert_eq!(config.job_history, 500);
        assert_eq!(config.build.program, vec!["python3", "build_runner.py"]);
        assert_eq!(config.builders[0].build_type, "release");
        assert_eq!(config.builders[0].compiler, "gcc");
        assert!(!config.builders[0].api_latest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_pool() {
        let mut config = sample();
        config.builders[0].pool = "windows".into();
        assert!(matches!(config.validate(), Err(Error::UnknownPool(p)) if p == "windows"));
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = sample();
        config.testers[0].name = "build".into();
        assert!(matches!(config.validate(), Err(Error::DuplicateName { .. })));
    }

    #[test]
    fn test_bad_branch_filter() {
        let mut config = sample();
        config.builders[0].branch = "(master".into();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidBranchFilter { .. })
        ));
    }

    #[test]
    fn test_unresolved_property_detected_at_load() {
        let mut config = sample();
        config.builders[0].conf_file = "${{ nope }}/conf.py".into();
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_tester_rejected() {
        let mut config = sample();
        config.testers[0].steps.clear();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_branch_filter_is_anchored() {
        let re = compile_branch_filter("master").unwrap();
        assert!(re.is_match("master"));
        assert!(!re.is_match("master-old"));
        assert!(!re.is_match("old-master"));
        let any = compile_branch_filter(".*").unwrap();
        assert!(any.is_match("feature/x"));
    }

    #[test]
    fn test_testers_for() {
        let config = sample();
        assert_eq!(config.testers_for("linux").count(), 1);
        assert_eq!(config.testers_for("embedded").count(), 0);
    }

    #[test]
    fn test_reporter_config_tags() {
        let reporters: Vec<ReporterConfig> =
            serde_yaml::from_str("- type: github\n  api_url: http://localhost\n- type: log\n")
                .unwrap();
        assert!(matches!(
            &reporters[0],
            ReporterConfig::Github(g) if g.token_env == "GITHUB_TOKEN"
        ));
        assert_eq!(reporters[1], ReporterConfig::Log);
    }
}
