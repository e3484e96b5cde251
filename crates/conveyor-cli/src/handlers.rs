//! Command handlers.

use crate::changes::NdjsonChanges;
use crate::commands::SourceArgs;
use anyhow::{Context, bail};
use conveyor_core::change::SourceStamp;
use conveyor_core::config::MasterConfig;
use conveyor_core::job::{Job, JobStatus};
use conveyor_core::ports::ChangeSource;
use conveyor_core::stage;
use conveyor_engine::BuildEngine;
use conveyor_notify::StatusReporter;
use conveyor_runner::{ProcessRunner, RunnerConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, info, warn};

impl SourceArgs {
    fn stamp(&self) -> SourceStamp {
        SourceStamp::new(&self.repository, &self.branch, &self.revision)
    }
}

/// Print a summary of a valid configuration.
pub fn validate(config: &MasterConfig, path: &Path) -> anyhow::Result<()> {
    println!("Configuration {} is valid", path.display());
    println!("  Workers:  {}", config.workers.len());
    for builder in &config.builders {
        println!(
            "  Builder:  {} (branch {}, product {}, pool {})",
            builder.name, builder.branch, builder.product_type, builder.pool
        );
    }
    for tester in &config.testers {
        println!(
            "  Tester:   {} (product {}, {} steps)",
            tester.name,
            tester.product_type,
            tester.steps.len()
        );
    }
    println!("  Reporters: {}", config.reporters.len());
    Ok(())
}

/// Print the resolved commands of a builder or tester.
pub fn stages(config: &MasterConfig, name: &str, source: &SourceArgs) -> anyhow::Result<()> {
    let stamp = source.stamp();
    let commands = if let Some(builder) = config.builder(name) {
        stage::build_stages(builder, &stamp, &config.build)?
    } else if let Some(tester) = config.tester(name) {
        stage::test_steps(tester, &stamp, &config.build)?
    } else {
        bail!("no builder or tester named `{}`", name);
    };

    for (index, command) in commands.iter().enumerate() {
        println!("{}. [{}] {}", index + 1, command.name, command.command_line());
    }
    Ok(())
}

/// Force one build, wait for it and every test it triggers.
///
/// Returns `true` if all of them succeeded.
pub async fn trigger(
    config: MasterConfig,
    builder: &str,
    source: &SourceArgs,
    actor: Option<String>,
) -> anyhow::Result<bool> {
    let engine = start_engine(config)?;
    let job_id = engine.force(builder, source.stamp(), actor).await?;
    info!(job_id = %job_id, "Waiting for build and triggered tests");

    tokio::select! {
        _ = engine.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling in-flight jobs");
            engine.shutdown().await;
        }
    }

    let jobs = engine.jobs().await;
    print_summary(&jobs);
    Ok(jobs.iter().all(|j| j.status == JobStatus::Success))
}

/// Feed change events to the schedulers until input ends and all work
/// drains, or until Ctrl-C. A followed file never ends.
pub async fn run(config: MasterConfig, changes: &Path, follow: bool) -> anyhow::Result<()> {
    let poll_interval = config.timers.poll_interval();
    let engine = start_engine(config)?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if changes == Path::new("-") {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(changes)
            .await
            .with_context(|| format!("cannot open {}", changes.display()))?;
        Box::new(BufReader::new(file))
    };
    let mut source = NdjsonChanges::new(reader);
    if follow {
        if changes == Path::new("-") {
            warn!("--follow has no effect on stdin");
        } else {
            info!(
                path = %changes.display(),
                interval_secs = poll_interval.as_secs(),
                "Following change file"
            );
            source = source.follow(poll_interval);
        }
    }

    let feed = async {
        while let Some(change) = source.next_change().await? {
            let accepted = engine.dispatch(&change);
            debug!(
                branch = %change.branch,
                revision = %change.revision,
                accepted,
                "Change received"
            );
        }
        info!("Change input ended, waiting for pending builds");
        if let Some(schedulers) = engine.schedulers() {
            schedulers.close().await;
        }
        engine.wait_idle().await;
        anyhow::Ok(())
    };

    tokio::select! {
        result = feed => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling in-flight jobs");
            engine.shutdown().await;
        }
    }

    print_summary(&engine.jobs().await);
    Ok(())
}

fn start_engine(config: MasterConfig) -> anyhow::Result<Arc<BuildEngine>> {
    let reporter =
        StatusReporter::from_config(&config).context("failed to set up status reporters")?;
    let runner = Arc::new(ProcessRunner::new(RunnerConfig::with_timeout(
        config.timers.stage_timeout(),
    )));
    Ok(BuildEngine::new(Arc::new(config), runner, reporter)?)
}

fn print_summary(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs ran");
        return;
    }
    for job in jobs {
        println!(
            "{:<10} {:<24} {:<10} {}/{} stages  {}",
            job.status.as_str(),
            job.spec_name,
            job.source.short_revision(),
            job.passed_stages(),
            job.commands.len(),
            job.failure.as_deref().unwrap_or("")
        );
    }
}
