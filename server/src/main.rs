//! Parley Server - direct messaging and presence service

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_server::{
    build_router,
    clock::SystemClock,
    config::Config,
    external::Collaborators,
    realtime::Hub,
    storage::Storage,
    AppState,
};

/// Parley Server CLI
#[derive(Parser)]
#[command(name = "parley-server")]
#[command(about = "Direct messaging and presence server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print conversation and message counts
    Stats,

    /// Run the server
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "parley_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).await?;
    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Stats => {
            print_stats(&config).await?;
        }
        Commands::Run => {
            run_server(config).await?;
        }
    }

    Ok(())
}

async fn print_stats(config: &Config) -> anyhow::Result<()> {
    let storage = Storage::new(&config.storage.database_path).await?;
    let stats = storage.get_stats().await?;

    println!("=== Parley Statistics ===");
    println!("Conversations:  {}", stats.conversations);
    println!("Messages:       {}", stats.messages);
    println!("Unsent:         {}", stats.unsent_messages);
    println!("=========================");

    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Starting Parley Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage
    let storage = Arc::new(Storage::new(&config.storage.database_path).await?);

    // External services: permissions, push, user directory
    let collaborators = Collaborators::from_config(&config.gate)?;

    let hub = Arc::new(Hub::new(
        storage,
        collaborators,
        &config,
        Arc::new(SystemClock),
    ));

    let state = AppState {
        config: config.clone(),
        hub,
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
