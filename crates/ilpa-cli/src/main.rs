use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ilpa_cli::commands::{ConfigCommand, HistoryCommand, MemoryCommand, StatsCommand};
use ilpa_cli::error::CliResult;
use ilpa_cli::output::OutputFormat;
use ilpa_server::config::Config;
use ilpa_server::storage::LanceStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ilpa-cli")]
#[command(about = "ILPA CLI - inspect conversation history and the memory buffer")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Show a user's conversation history")]
    History(HistoryCommand),

    #[clap(about = "Memory buffer commands")]
    Memory(MemoryCommand),

    #[clap(about = "Show buffer and log statistics for a user")]
    Stats(StatsCommand),

    #[clap(about = "Configuration commands")]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    match &cli.command {
        Command::Config(cmd) => cmd.execute(cli.config.as_deref(), format).await,
        Command::History(cmd) => {
            let (_, store) = open_store(&cli).await?;
            cmd.execute(&store, format).await
        }
        Command::Memory(cmd) => {
            let (config, store) = open_store(&cli).await?;
            cmd.execute(&store, &config.memory, format).await
        }
        Command::Stats(cmd) => {
            let (config, store) = open_store(&cli).await?;
            cmd.execute(&store, &config.memory, format).await
        }
    }
}

/// Load the config and open the data directory it (or `--data-dir`) points at
async fn open_store(cli: &Cli) -> CliResult<(Config, Arc<LanceStore>)> {
    let config = Config::load(cli.config.as_deref())?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.storage.data_dir.clone());

    if !data_dir.exists() {
        return Err(format!("No ILPA data found at {}", data_dir.display()).into());
    }
    let store = Arc::new(LanceStore::open(&data_dir).await?);
    Ok((config, store))
}
