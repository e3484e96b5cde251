//! Process-based command execution, locally or over ssh.

use crate::runner::{
    CommandContext, CommandResult, CommandRunner, OutputLine, OutputStream, RunnerConfig,
};
use async_trait::async_trait;
use conveyor_core::worker::WorkerEndpoint;
use conveyor_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs stage commands as child processes.
pub struct ProcessRunner {
    config: RunnerConfig,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Build the process for a context: direct exec for local workers,
    /// `ssh ... -- sh -c '<cd && exec>'` for remote ones.
    async fn build_command(&self, ctx: &CommandContext) -> Result<Command> {
        let command = &ctx.command;
        let mut cmd = match &ctx.worker.endpoint {
            None => {
                tokio::fs::create_dir_all(&command.workdir).await?;
                let mut cmd = Command::new(&command.program);
                cmd.args(&command.args).current_dir(&command.workdir);
                cmd
            }
            Some(endpoint) => {
                let mut cmd = Command::new("ssh");
                cmd.args(ssh_args(endpoint, ctx)?);
                cmd
            }
        };

        cmd.envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        ctx: &CommandContext,
        cancel: CancellationToken,
        output_tx: Option<mpsc::Sender<OutputLine>>,
    ) -> Result<CommandResult> {
        let start = std::time::Instant::now();
        let stage = ctx.command.name.clone();

        info!(
            stage = %stage,
            worker = %ctx.worker.id,
            command = %ctx.command.command_line(),
            "Executing stage command"
        );

        let mut child = self
            .build_command(ctx)
            .await?
            .spawn()
            .map_err(|e| Error::Spawn {
                program: ctx.command.program.clone(),
                message: e.to_string(),
            })?;

        let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_lines(stdout, OutputStream::Stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_lines(stderr, OutputStream::Stderr, line_tx.clone()));
        }
        drop(line_tx);

        let collector = tokio::spawn(async move {
            let mut captured = String::new();
            while let Some(line) = line_rx.recv().await {
                if !captured.is_empty() {
                    captured.push('\n');
                }
                captured.push_str(&line.content);
                if let Some(tx) = &output_tx {
                    let _ = tx.send(line).await;
                }
            }
            captured
        });

        let limit = self.config.timeout;
        let deadline = async move {
            match limit {
                Some(limit) => sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = deadline => Outcome::TimedOut,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            if let Err(e) = child.kill().await {
                warn!(stage = %stage, error = %e, "Failed to kill stage process");
            }
        }

        let output = match timeout(self.config.drain_timeout, collector).await {
            Ok(Ok(captured)) => captured,
            _ => {
                warn!(stage = %stage, "Output stream did not close, discarding tail");
                String::new()
            }
        };

        let status = match outcome {
            Outcome::Exited(status) => status?,
            Outcome::Cancelled => {
                info!(stage = %stage, "Stage command cancelled");
                return Err(Error::Cancelled);
            }
            Outcome::TimedOut => {
                let seconds = limit.map(|d| d.as_secs()).unwrap_or_default();
                warn!(stage = %stage, seconds, "Stage command timed out, process killed");
                return Err(Error::StageTimeout { stage, seconds });
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(stage = %stage, exit_code, duration_ms, "Stage command completed");

        Ok(CommandResult {
            exit_code,
            success: exit_code == 0,
            duration_ms,
            output,
        })
    }
}

/// Forward output line by line until EOF.
///
/// Bytes that are not UTF-8 are replaced, and the pipe is drained to the
/// end even once nobody is listening so the child never sees a closed pipe.
async fn stream_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut line_number = 0u32;
    let mut forwarding = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read stage output");
                break;
            }
        }
        if !forwarding {
            continue;
        }

        line_number += 1;
        let content = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        let line = OutputLine {
            stream,
            content,
            line_number,
            timestamp: chrono::Utc::now(),
        };
        if tx.send(line).await.is_err() {
            forwarding = false;
        }
    }
}

fn ssh_args(endpoint: &WorkerEndpoint, ctx: &CommandContext) -> Result<Vec<String>> {
    // A forced pty makes sshd hang up the remote command when the client
    // is killed on cancel or timeout.
    let mut args = vec![
        "-tt".to_string(),
        "-p".to_string(),
        endpoint.port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
    ];

    if let Some(var) = &endpoint.identity_env {
        let identity = std::env::var(var).map_err(|_| {
            Error::InvalidConfig(format!(
                "worker `{}` identity variable `{}` is not set",
                ctx.worker.id, var
            ))
        })?;
        args.push("-i".to_string());
        args.push(identity);
    }

    let workdir = ctx.command.workdir.display().to_string();
    let exec = std::iter::once(ctx.command.program.as_str())
        .chain(ctx.command.args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ");
    let script = format!(
        "mkdir -p {dir} && cd {dir} && exec {exec}",
        dir = shell_quote(&workdir)
    );

    args.push(endpoint.destination());
    args.push("--".to_string());
    args.push(script);
    Ok(args)
}

/// Single-quote a word for a POSIX shell.
fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}
