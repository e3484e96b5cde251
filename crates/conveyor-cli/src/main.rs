//! Conveyor CI command-line entrypoint.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod changes;
mod commands;
mod handlers;
mod logging;
mod settings;

use commands::{Commands, LogFormat};

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(author, version, about = "Conveyor CI build master", long_about = None)]
struct Cli {
    /// Master configuration file
    #[arg(short, long, global = true, env = "CONVEYOR_CONFIG", default_value = "conveyor.yaml")]
    config: PathBuf,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "CONVEYOR_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let config = settings::load(&cli.config)?;

    match cli.command {
        Commands::Validate => handlers::validate(&config, &cli.config)?,
        Commands::Stages { name, source } => handlers::stages(&config, &name, &source)?,
        Commands::Trigger {
            builder,
            source,
            actor,
        } => {
            if !handlers::trigger(config, &builder, &source, actor).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Run { changes, follow } => handlers::run(config, &changes, follow).await?,
    }

    Ok(ExitCode::SUCCESS)
}
