//! Test helper functions and utilities.

use async_trait::async_trait;
use conveyor_core::config::MasterConfig;
use conveyor_core::{Error, Result};
use conveyor_engine::BuildEngine;
use conveyor_notify::StatusReporter;
use conveyor_runner::{CommandContext, CommandResult, CommandRunner, OutputLine};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Command runner that follows a per-stage script and records what ran.
#[derive(Default)]
pub struct ScriptedRunner {
    exits: Mutex<HashMap<String, i32>>,
    ran: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every run of `stage` exit with `code`.
    pub fn fail(&self, stage: &str, code: i32) {
        self.exits
            .lock()
            .unwrap()
            .insert(stage.to_string(), code);
    }

    /// Stage names in the order they ran.
    pub fn stages(&self) -> Vec<String> {
        self.ran.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    /// Full command lines in the order they ran.
    pub fn command_lines(&self) -> Vec<String> {
        self.ran.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        ctx: &CommandContext,
        cancel: CancellationToken,
        _output_tx: Option<mpsc::Sender<OutputLine>>,
    ) -> Result<CommandResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.ran
            .lock()
            .unwrap()
            .push((ctx.command.name.clone(), ctx.command.command_line()));

        let exit_code = self
            .exits
            .lock()
            .unwrap()
            .get(&ctx.command.name)
            .copied()
            .unwrap_or(0);
        Ok(CommandResult {
            exit_code,
            success: exit_code == 0,
            duration_ms: 1,
            output: format!("{} on {}\n", ctx.command.name, ctx.worker.id),
        })
    }
}

/// Build an engine with no status sinks.
pub fn start_engine(config: MasterConfig, runner: Arc<ScriptedRunner>) -> Arc<BuildEngine> {
    start_engine_with(config, runner, StatusReporter::disabled())
}

pub fn start_engine_with(
    config: MasterConfig,
    runner: Arc<ScriptedRunner>,
    reporter: StatusReporter,
) -> Arc<BuildEngine> {
    BuildEngine::new(Arc::new(config), runner, reporter).expect("engine starts")
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Operation timed out")
}
