//! End-to-end scenarios: change events through schedulers, the engine and
//! status sinks.
//!
//! Run with: `cargo test -p conveyor-tests --test pipeline_tests`

use conveyor_core::config::GithubReporterConfig;
use conveyor_core::ids::WorkerId;
use conveyor_core::job::{JobKind, JobStatus, TriggerReason};
use conveyor_core::worker::WorkerStatus;
use conveyor_notify::{GithubStatusSink, StatusReporter};
use conveyor_scheduler::SchedulerState;
use conveyor_tests::{
    ChangeFixture, ScriptedRunner, assert_completes_within, builds_only_config, init_test_logging,
    master_config, source, start_engine, start_engine_with,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STABLE: Duration = Duration::from_secs(10);

#[tokio::test(start_paused = true)]
async fn test_master_change_builds_once_then_tests() {
    init_test_logging();
    let runner = ScriptedRunner::new();
    let engine = start_engine(master_config(), runner.clone());

    assert_eq!(engine.dispatch(&ChangeFixture::push("master", "abc123")), 1);
    tokio::time::sleep(STABLE + Duration::from_secs(1)).await;
    engine.wait_idle().await;

    let jobs = engine.jobs().await;
    let builds: Vec<_> = jobs.iter().filter(|j| j.kind == JobKind::Build).collect();
    let tests: Vec<_> = jobs.iter().filter(|j| j.kind == JobKind::Test).collect();
    assert_eq!(builds.len(), 1);
    assert_eq!(tests.len(), 1);

    let build = builds[0];
    assert_eq!(build.status, JobStatus::Success);
    assert_eq!(build.source.revision, "abc123");
    assert!(matches!(build.reason, TriggerReason::Change { .. }));
    assert_eq!(tests[0].parent, Some(build.id));
    assert_eq!(tests[0].status, JobStatus::Success);

    assert_eq!(
        runner.stages(),
        ["clean", "extract", "build", "install", "pack", "copy", "smoke"]
    );
    assert_eq!(
        runner.command_lines().last().map(String::as_str),
        Some("python3 smoke_test.py --revision abc123")
    );
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_builds_latest_revision() {
    let runner = ScriptedRunner::new();
    let engine = start_engine(builds_only_config(), runner.clone());
    let schedulers = engine.schedulers().unwrap();
    let scheduler = schedulers.change_schedulers().next().unwrap();

    for revision in ["r1", "r2", "r3"] {
        engine.dispatch(&ChangeFixture::push("master", revision));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(scheduler.state(), SchedulerState::Debouncing);
    }
    assert_eq!(scheduler.fire_count(), 0);

    tokio::time::sleep(STABLE).await;
    engine.wait_idle().await;

    assert_eq!(scheduler.fire_count(), 1);
    let jobs = engine.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].source.revision, "r3");
}

#[tokio::test(start_paused = true)]
async fn test_other_branch_is_ignored() {
    let runner = ScriptedRunner::new();
    let engine = start_engine(builds_only_config(), runner.clone());

    assert_eq!(engine.dispatch(&ChangeFixture::push("feature/x", "abc")), 0);
    tokio::time::sleep(STABLE * 2).await;
    engine.wait_idle().await;

    assert!(engine.jobs().await.is_empty());
    assert!(runner.stages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_same_repo_pull_request_is_ignored() {
    let runner = ScriptedRunner::new();
    let engine = start_engine(builds_only_config(), runner.clone());

    assert_eq!(
        engine.dispatch(&ChangeFixture::same_repo_pull_request("master", "abc")),
        0
    );
    assert_eq!(engine.dispatch(&ChangeFixture::fork_pull_request("master", "def")), 1);
    tokio::time::sleep(STABLE + Duration::from_secs(1)).await;
    engine.wait_idle().await;

    let jobs = engine.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].source.revision, "def");
}

#[tokio::test]
async fn test_failed_build_skips_remaining_stages_and_tests() {
    let runner = ScriptedRunner::new();
    runner.fail("build", 2);
    let engine = start_engine(master_config(), runner.clone());

    let job_id = engine
        .force("build-linux", source("abc123"), Some("dev".into()))
        .await
        .unwrap();
    assert_completes_within(engine.wait_idle(), Duration::from_secs(5)).await;

    let job = engine.status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failure);
    assert_eq!(job.failure.as_deref(), Some("Stage build failed with exit code 2"));
    assert_eq!(runner.stages(), ["clean", "extract", "build"]);
    assert_eq!(engine.jobs().await.len(), 1);
    assert_eq!(
        engine.pool().status(&WorkerId::new("linux-01")),
        Some(WorkerStatus::Free)
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_pending_change() {
    let runner = ScriptedRunner::new();
    let engine = start_engine(builds_only_config(), runner.clone());

    engine.dispatch(&ChangeFixture::push("master", "abc"));
    engine.schedulers().unwrap().close().await;
    engine.wait_idle().await;

    let jobs = engine.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Success);
}

#[tokio::test]
async fn test_github_statuses_for_build_and_test() {
    let server = MockServer::start().await;
    for state in ["pending", "success"] {
        Mock::given(method("POST"))
            .and(path("/repos/org/product/statuses/abc123"))
            .and(header("authorization", "Bearer token"))
            .and(body_partial_json(serde_json::json!({ "state": state })))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;
    }

    let github = GithubReporterConfig {
        api_url: server.uri(),
        ..Default::default()
    };
    let reporter = StatusReporter::new(vec![Arc::new(
        GithubStatusSink::with_token(&github, "token").unwrap(),
    )])
    .with_status_url("http://ci.local");

    let runner = ScriptedRunner::new();
    let engine = start_engine_with(master_config(), runner, reporter);
    engine.force("build-linux", source("abc123"), None).await.unwrap();
    assert_completes_within(engine.wait_idle(), Duration::from_secs(10)).await;

    let requests = server.received_requests().await.unwrap();
    let contexts: Vec<String> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["context"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(contexts.len(), 4);
    assert_eq!(contexts.iter().filter(|c| *c == "ci/build-linux").count(), 2);
    assert_eq!(contexts.iter().filter(|c| *c == "ci/test-linux").count(), 2);
    server.verify().await;
}

#[tokio::test]
async fn test_unreachable_status_sink_does_not_fail_build() {
    let github = GithubReporterConfig {
        api_url: "http://127.0.0.1:9".to_string(),
        timeout_seconds: 1,
        ..Default::default()
    };
    let reporter = StatusReporter::new(vec![Arc::new(
        GithubStatusSink::with_token(&github, "token").unwrap(),
    )]);

    let runner = ScriptedRunner::new();
    let engine = start_engine_with(builds_only_config(), runner, reporter);
    let job_id = engine.force("build-linux", source("abc123"), None).await.unwrap();
    assert_completes_within(engine.wait_idle(), Duration::from_secs(10)).await;

    assert_eq!(engine.status(job_id).await.unwrap().status, JobStatus::Success);
}
