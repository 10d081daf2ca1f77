mod cmd;
mod controller;
mod output;

use clap::{Parser, Subcommand};
use cmd::{audit::AuditSubcommand, config::ConfigSubcommand, partitions::PartitionsSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "medic",
    about = "Autonomous operations controller: detect, gate, remediate, rotate, audit",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file
    #[arg(
        long,
        global = true,
        env = "MEDIC_CONFIG",
        default_value = medic_core::config::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the healing loop, partition manager and HTTP surface until Ctrl-C
    Run,

    /// Run one healing cycle and print its decision record
    Cycle,

    /// Partition lifecycle
    Partitions {
        #[command(subcommand)]
        subcommand: PartitionsSubcommand,
    },

    /// Review the audit trail
    Audit {
        #[command(subcommand)]
        subcommand: AuditSubcommand,
    },

    /// Validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_path();
    let result = match cli.command {
        Commands::Run => cmd::run::run(config),
        Commands::Cycle => cmd::cycle::run(config, cli.json),
        Commands::Partitions { subcommand } => cmd::partitions::run(config, subcommand, cli.json),
        Commands::Audit { subcommand } => cmd::audit::run(config, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
