mod clients;
mod config;
mod dashboard;
mod error;
mod metrics;
mod node;
mod spool;

use clap::{Parser, Subcommand};
use config::{LogFormat, LoggingSection, NodeConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "veriscore-node")]
#[command(about = "Veriscore validator node - evidence scoring and weight setting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the validator node")]
    Start {
        #[arg(short, long, default_value = "/etc/veriscore/node.toml")]
        config: PathBuf,
    },

    #[command(about = "Show node status")]
    Status {
        #[arg(short, long, default_value = "http://localhost:8080")]
        endpoint: String,
    },

    #[command(about = "Generate default configuration")]
    Config {
        #[arg(short, long, default_value = "node.toml")]
        output: PathBuf,
    },

    #[command(about = "Score a single round file and print the report")]
    Score {
        round: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, help = "Persist updated histories and the report")]
        save: bool,
    },
}

fn init_logging(logging: &LoggingSection) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn logging_for(config: Option<&PathBuf>) -> LoggingSection {
    config
        .and_then(|path| NodeConfig::load(path).ok())
        .map(|config| config.logging)
        .unwrap_or_default()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Start { config } => Some(config),
        Commands::Score { config, .. } => config.as_ref(),
        _ => None,
    };
    init_logging(&logging_for(config_path));

    let result = match cli.command {
        Commands::Start { config } => node::run(config).await,
        Commands::Status { endpoint } => node::status(endpoint).await,
        Commands::Config { output } => config::generate_default(&output),
        Commands::Score {
            round,
            config,
            save,
        } => node::score(round, config, save).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
