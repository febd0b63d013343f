use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod giturl;
mod pipeline;
mod reaper;
mod sandbox;
mod server;
mod store;

use config::Config;
use pipeline::launch_step::HttpProbe;
use pipeline::Orchestrator;
use sandbox::DockerProvider;
use store::MemoryStore;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(
    author,
    version,
    about = "Ephemeral dev-sandbox orchestrator - clone, bootstrap, serve"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator API and the idle reaper
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory containing drydock.toml
        #[arg(short, long, default_value = ".")]
        config_dir: PathBuf,
    },

    /// Parse a repository URL and print its canonical form
    CheckUrl {
        /// HTTPS or SSH repository URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("drydock=debug")
    } else {
        EnvFilter::new("drydock=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, config_dir } => {
            let mut config = Config::load(&config_dir)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
        Commands::CheckUrl { url } => {
            let parsed = giturl::GitUrl::parse(&url)?;
            println!("{}", parsed.https_url());
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let store = Arc::new(MemoryStore::new(config.lifecycle.grace_window()));
    let provider = Arc::new(DockerProvider::new(config.sandbox.clone())?);
    let probe = Arc::new(HttpProbe::new());

    let reaper_store = store.clone();
    let reaper_provider = provider.clone();
    let reaper_interval = std::time::Duration::from_secs(config.lifecycle.reaper_interval_secs);
    tokio::spawn(async move {
        reaper::run_reaper(reaper_store, reaper_provider, reaper_interval).await;
    });

    let port = config.server.port;
    let orchestrator = Arc::new(Orchestrator::new(store, provider, probe, config));
    server::serve(orchestrator, port).await
}
