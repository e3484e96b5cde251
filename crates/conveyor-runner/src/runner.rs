//! Core runner trait and types.

use async_trait::async_trait;
use conveyor_core::Result;
use conveyor_core::stage::StageCommand;
use conveyor_core::worker::Worker;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Output line from command execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of a finished command.
///
/// A non-zero exit is a normal result, not an error: the caller decides
/// whether it fails the job.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    /// Interleaved stdout and stderr, one line per entry, newline-joined.
    pub output: String,
}

/// Everything needed to run one stage command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub command: StageCommand,
    pub worker: Worker,
    pub env: HashMap<String, String>,
}

impl CommandContext {
    pub fn new(command: StageCommand, worker: Worker) -> Self {
        Self {
            command,
            worker,
            env: HashMap::new(),
        }
    }
}

/// Trait for command execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Returns `Error::Cancelled` when `cancel` fires and
    /// `Error::StageTimeout` when the configured timeout elapses; in both
    /// cases the process has been killed. Output lines are forwarded to
    /// `output_tx` when one is given.
    async fn run(
        &self,
        ctx: &CommandContext,
        cancel: CancellationToken,
        output_tx: Option<mpsc::Sender<OutputLine>>,
    ) -> Result<CommandResult>;
}

/// Configuration for command execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub timeout: Option<Duration>,
    /// Grace period for draining output after the process is gone.
    pub drain_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(3 * 3600)),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}
