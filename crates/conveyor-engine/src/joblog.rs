//! Plain-text per-job log files.

use conveyor_core::job::Job;
use conveyor_core::stage::StageCommand;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Log at `<dir>/<spec-name>/<job-id>.log`.
///
/// Write failures are logged once and turn the log off; they never fail
/// the job.
pub struct JobLog {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl JobLog {
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub async fn create(dir: &Path, job: &Job) -> Self {
        let path = dir.join(&job.spec_name).join(format!("{}.log", job.id));
        let file = match open(&path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot create job log");
                None
            }
        };

        let mut log = Self {
            path: Some(path),
            file,
        };
        log.write(&format!(
            "{} {} ({})\nsource: {} {} {}\n\n",
            job.kind.as_str(),
            job.spec_name,
            job.id,
            job.source.repository,
            job.source.branch,
            job.source.revision
        ))
        .await;
        log
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn command(&mut self, command: &StageCommand) {
        self.write(&format!("cmd: {}\n", command.command_line())).await;
    }

    pub async fn output(&mut self, output: &str) {
        if output.is_empty() {
            return;
        }
        let mut text = output.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.write(&text).await;
    }

    pub async fn failure(&mut self, exit_code: i32) {
        self.write(&format!("ERROR: app failed with return code: {}\n", exit_code))
            .await;
    }

    pub async fn error(&mut self, message: &str) {
        self.write(&format!("ERROR: {}\n", message)).await;
    }

    pub async fn summary(&mut self, passed: usize, total: usize) {
        self.write(&format!("\nPASSED {} of {}\n", passed, total)).await;
        if let Some(file) = self.file.as_mut()
            && let Err(e) = file.flush().await
        {
            warn!(error = %e, "Failed to flush job log");
        }
    }

    async fn write(&mut self, text: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(text.as_bytes()).await {
            warn!(
                path = ?self.path,
                error = %e,
                "Job log write failed, disabling log"
            );
            self.file = None;
        }
    }
}

async fn open(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    File::create(path).await
}
