mod commands;

use anyhow::Result;
use assessor_common::config::DEFAULT_CONFIG_PATH;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "assessor-cli")]
#[command(about = "Assessor CLI - Inspect submissions, cluster similarity reports, manage configuration", long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every submission directory for the expected files
    Validate {
        /// Directory holding one subdirectory per submission
        #[arg(short, long)]
        root: PathBuf,

        /// Expected file name (repeatable, e.g. -e Queue.java -e Stack.java)
        #[arg(short, long = "expect", required = true)]
        expected: Vec<String>,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Group submissions connected by similarity pairs
    Cluster {
        /// JSON file with [{"first": .., "second": .., "score": ..}, ..]
        #[arg(short, long)]
        pairs: PathBuf,

        /// Minimum score for two submissions to be linked (overrides config)
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Print the effective configuration after environment overrides
    ShowConfig,

    /// Write a default configuration file
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Validate { root, expected, json } => {
            commands::validate(&root, &expected, json)?;
        }
        Commands::Cluster { pairs, threshold } => {
            let config = commands::load_config(&cli.config)?;
            commands::cluster(&pairs, threshold.unwrap_or(config.clustering.threshold)).await?;
        }
        Commands::ShowConfig => {
            let config = commands::load_config(&cli.config)?;
            commands::show_config(&config)?;
        }
        Commands::Init { path, force } => {
            commands::init_project(&path, force).await?;
        }
    }

    Ok(())
}
