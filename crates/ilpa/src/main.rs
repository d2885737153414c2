//! ILPA daemon - life-coach chat API with a bounded memory buffer

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ilpa_server::IlpaError;
use ilpa_server::coach::ConversationOrchestrator;
use ilpa_server::completion::{SamplingParams, build_gateway};
use ilpa_server::config::{Config, StorageBackend, StorageConfig};
use ilpa_server::error::Result;
use ilpa_server::server::ApiServer;
use ilpa_server::storage::{InMemoryStore, LanceStore, StoreHandles};

/// ILPA - Integrated Life Planning Assistant backend
#[derive(Parser)]
#[command(name = "ilpa")]
#[command(about = "Life-coach chat API with a bounded rolling memory")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the API server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ilpa_server=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn open_stores(config: &StorageConfig) -> Result<StoreHandles> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            Ok(StoreHandles::from_store(Arc::new(InMemoryStore::new())))
        }
        StorageBackend::Lance => {
            let data_dir = &config.data_dir;
            tracing::info!("Initializing storage at: {}", data_dir.display());

            std::fs::create_dir_all(data_dir).map_err(|e| {
                IlpaError::Storage(format!(
                    "Failed to create data directory {}: {}",
                    data_dir.display(),
                    e
                ))
            })?;

            let store = LanceStore::open(data_dir).await?;
            Ok(StoreHandles::from_store(Arc::new(store)))
        }
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting ILPA backend");

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;
    tracing::debug!("Config loaded: {:?}", config);

    let memory = &config.memory;
    if memory.context_entries > memory.context_window {
        tracing::warn!(
            "memory.context_entries ({}) exceeds memory.context_window ({}); only {} entries can reach the prompt",
            memory.context_entries,
            memory.context_window,
            memory.effective_context_entries()
        );
    }
    tracing::info!(
        "Memory buffer capacity {}, context fetches {} and renders {} entries",
        memory.buffer_capacity,
        memory.context_window,
        memory.effective_context_entries()
    );

    let stores = open_stores(&config.storage).await?;

    let gateway = build_gateway(&config.completion)?;
    tracing::info!(
        "Completion provider: {} ({})",
        gateway.name(),
        config.completion.model
    );

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        stores.clone(),
        gateway,
        &config.memory,
        SamplingParams::from_config(&config.completion),
    ));
    tracing::info!("Life Coach agent initialized");

    let server = ApiServer::new(config.server.clone(), orchestrator, stores.log);
    server.serve().await
}
