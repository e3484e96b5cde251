//! Build stage pipeline.
//!
//! A build job is the fixed sequence CLEAN → EXTRACT → BUILD → INSTALL →
//! PACK → COPY. Each stage is one invocation of the configured build
//! program with a deterministic argument list; only the `--stage` value
//! differs between stages.

use crate::change::SourceStamp;
use crate::config::{BuildSettings, BuilderSpec, TesterSpec};
use crate::interpolation::Properties;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clean,
    Extract,
    Build,
    Install,
    Pack,
    Copy,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Clean,
        Stage::Extract,
        Stage::Build,
        Stage::Install,
        Stage::Pack,
        Stage::Copy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::Extract => "extract",
            Stage::Build => "build",
            Stage::Install => "install",
            Stage::Pack => "pack",
            Stage::Copy => "copy",
        }
    }

    /// Argument template for this stage, before interpolation.
    pub fn template(&self, builder: &BuilderSpec) -> Vec<String> {
        let mut args: Vec<String> = [
            "--build-config",
            "${{ conf_file }}",
            "--root-dir",
            "${{ root_dir }}",
            "--changed-repo",
            "${{ repo_name }}:${{ branch }}:${{ revision }}",
            "--build-type",
            "${{ build_type }}",
            "--build-event",
            "commit",
            "--product-type",
            "${{ product_type }}",
            "--repo-url",
            "${{ repository }}",
            "--stage",
            self.as_str(),
            "compiler=${{ compiler }}",
            "compiler_version=${{ compiler_version }}",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if builder.api_latest {
            args.push("api_latest=True".to_string());
        }
        if builder.fastboot {
            args.push("fastboot=True".to_string());
        }
        args
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-resolved command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageCommand {
    /// Stage or test step name.
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Directory the command runs in.
    pub workdir: PathBuf,
}

impl StageCommand {
    /// Program and arguments joined by spaces, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn base_properties(name: &str, source: &SourceStamp, settings: &BuildSettings) -> Properties {
    let builddir = settings.builddir(name);
    let root_dir = builddir.join(&settings.root_subdir);
    Properties::new()
        .with("buildername", name)
        .with("builddir", builddir.display().to_string())
        .with("root_dir", root_dir.display().to_string())
        .with("repository", &source.repository)
        .with("repo_name", source.repo_name())
        .with("branch", &source.branch)
        .with("revision", &source.revision)
}

/// Properties visible to a builder's templates.
pub fn build_properties(
    builder: &BuilderSpec,
    source: &SourceStamp,
    settings: &BuildSettings,
) -> Result<Properties> {
    let mut props = base_properties(&builder.name, source, settings);
    props
        .set("product_type", &builder.product_type)
        .set("build_type", &builder.build_type)
        .set("compiler", &builder.compiler)
        .set("compiler_version", &builder.compiler_version);

    // The conf file may itself be a template, e.g. `${{ builddir }}/conf.py`.
    let context = format!("builder `{}`", builder.name);
    let conf_file = props.interpolate(&builder.conf_file, &context)?;
    props.set("conf_file", conf_file);
    Ok(props)
}

/// Resolve the six stage commands of a build job.
///
/// The result depends only on the inputs: calling this twice with the
/// same builder, source stamp and settings yields identical commands.
pub fn build_stages(
    builder: &BuilderSpec,
    source: &SourceStamp,
    settings: &BuildSettings,
) -> Result<Vec<StageCommand>> {
    let props = build_properties(builder, source, settings)?;
    let context = format!("builder `{}`", builder.name);
    let workdir = settings.builddir(&builder.name);

    let (program, leading) = split_program(&settings.program, &props, &context)?;

    Stage::ALL
        .iter()
        .map(|stage| {
            let mut args = leading.clone();
            for template in stage.template(builder) {
                args.push(props.interpolate(&template, &context)?);
            }
            Ok(StageCommand {
                name: stage.as_str().to_string(),
                program: program.clone(),
                args,
                workdir: workdir.clone(),
            })
        })
        .collect()
}

/// Resolve the step commands of a test job.
pub fn test_steps(
    tester: &TesterSpec,
    source: &SourceStamp,
    settings: &BuildSettings,
) -> Result<Vec<StageCommand>> {
    let mut props = base_properties(&tester.name, source, settings);
    props
        .set("product_type", &tester.product_type)
        .set("build_type", &tester.build_type);
    let workdir = settings.builddir(&tester.name);

    tester
        .steps
        .iter()
        .map(|step| {
            let context = format!("tester `{}` step `{}`", tester.name, step.name);
            let args = step
                .args
                .iter()
                .map(|arg| props.interpolate(arg, &context))
                .collect::<Result<Vec<_>>>()?;
            Ok(StageCommand {
                name: step.name.clone(),
                program: props.interpolate(&step.program, &context)?,
                args,
                workdir: workdir.clone(),
            })
        })
        .collect()
}

fn split_program(
    program: &[String],
    props: &Properties,
    context: &str,
) -> Result<(String, Vec<String>)> {
    let (first, rest) = program
        .split_first()
        .ok_or_else(|| Error::InvalidConfig("build.program must not be empty".into()))?;
    let leading = rest
        .iter()
        .map(|arg| props.interpolate(arg, context))
        .collect::<Result<Vec<_>>>()?;
    Ok((props.interpolate(first, context)?, leading))
}
