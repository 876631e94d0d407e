use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use quartermaster::gateway::console::{self, ConsoleGateway};
use quartermaster::lifecycle::Lifecycle;
use quartermaster::requisition::ParticipantId;
use quartermaster::settings::Settings;
use quartermaster::store::{DbHandle, Store};

#[derive(Parser)]
#[command(name = "quartermaster")]
#[command(version, about = "Material requisition tracker for chat communities")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the SQLite database.
    #[arg(long, default_value = "quartermaster.db", global = true)]
    pub db_path: PathBuf,

    /// Path to the settings file.
    #[arg(long, default_value = "quartermaster.toml", global = true)]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the lifecycle against the console gateway (local development).
    Serve,
    /// Create the database schema and exit.
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::InitDb => {
            Store::open(&cli.db_path).context("Failed to open database")?;
            println!("Initialized database at {}", cli.db_path.display());
            Ok(())
        }
        Commands::Serve => serve(&cli).await,
    }
}

async fn serve(cli: &Cli) -> Result<()> {
    let settings = Settings::load(&cli.settings).context("Failed to load settings")?;
    let store = Store::open(&cli.db_path).context("Failed to open database")?;
    let gateway = Arc::new(ConsoleGateway::new());

    // The console gateway has no real platform identity; participant 0 is
    // reserved for the service itself.
    let lifecycle = Lifecycle::new(gateway, DbHandle::new(store), settings, ParticipantId(0));
    Arc::clone(&lifecycle)
        .restore()
        .await
        .context("Failed to restore working set")?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(console::read_events(tx));

    println!("quartermaster console. Input: msg <user> <text> | dm <user> <text> | react <user> <handle> <accept|complete>");
    lifecycle.run(rx).await;
    Ok(())
}
