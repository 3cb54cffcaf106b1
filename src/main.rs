use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Durable store-and-forward telemetry agent", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        /// Read NDJSON records ({"stream": ..., "payload": ...}) from stdin
        #[arg(long)]
        stdin: bool,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the status file written by a running agent
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = courier::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run { stdin }) => {
            courier::cli::run::run(config_path, stdin).await?;
        }
        None => {
            // Default behavior is to run
            courier::cli::run::run(config_path, false).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                courier::cli::config::init(stdout)?;
            }
        },
        Some(Commands::Status) => {
            courier::cli::status::show(config_path)?;
        }
    }

    Ok(())
}
