//! Test fixtures: master configurations and change events.

use conveyor_core::change::{ChangeEvent, PullRequest, SourceStamp};
use conveyor_core::config::MasterConfig;

pub const REPOSITORY: &str = "https://github.com/org/product";
pub const BASE_REPO: &str = "org/product";

/// One linux worker, one master builder, one linux tester.
pub const MASTER_CONFIG: &str = r#"
title: Product CI
base_repository: org/product
timers:
  tree_stable_timer_secs: 10
  worker_wait_timeout_secs: 600
workers:
  - id: linux-01
    pool: linux
builders:
  - name: build-linux
    branch: master
    product_type: linux
    build_type: release
    pool: linux
    conf_file: conf_linux_public.py
testers:
  - name: test-linux
    product_type: linux
    pool: linux
    steps:
      - name: smoke
        program: python3
        args: ["smoke_test.py", "--revision", "${{ revision }}"]
"#;

pub fn master_config() -> MasterConfig {
    parse(MASTER_CONFIG)
}

/// [`MASTER_CONFIG`] without testers, for scenarios that count only builds.
pub fn builds_only_config() -> MasterConfig {
    let mut config = master_config();
    config.testers.clear();
    config
}

pub fn parse(yaml: &str) -> MasterConfig {
    let config: MasterConfig = serde_yaml::from_str(yaml).expect("fixture config parses");
    config.validate().expect("fixture config is valid");
    config
}

pub struct ChangeFixture;

impl ChangeFixture {
    /// Push to the main repository.
    pub fn push(branch: &str, revision: &str) -> ChangeEvent {
        ChangeEvent::new(REPOSITORY, branch, revision)
    }

    /// Pull request opened from a branch of the main repository.
    pub fn same_repo_pull_request(branch: &str, revision: &str) -> ChangeEvent {
        ChangeEvent::new(REPOSITORY, branch, revision).with_pull_request(PullRequest {
            number: 7,
            head_repo: BASE_REPO.to_string(),
            base_repo: Some(BASE_REPO.to_string()),
        })
    }

    /// Pull request opened from a fork.
    pub fn fork_pull_request(branch: &str, revision: &str) -> ChangeEvent {
        ChangeEvent::new(REPOSITORY, branch, revision).with_pull_request(PullRequest {
            number: 8,
            head_repo: "contributor/product".to_string(),
            base_repo: Some(BASE_REPO.to_string()),
        })
    }
}

pub fn source(revision: &str) -> SourceStamp {
    SourceStamp::new(REPOSITORY, "master", revision)
}
