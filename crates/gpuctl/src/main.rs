//! gpuctl — GPU instance orchestration control plane
//!
//! Boots the cache manager, job queue, instance service, and migration
//! scheduler, then either serves the background workers or runs a single
//! maintenance action.

use clap::{Parser, Subcommand};
use gpuctl_config::AppConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gpuctl")]
#[command(about = "GPU instance orchestration control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the control plane and run workers, migration scheduler, and
    /// Startup Sync until terminated.
    Serve,

    /// Run Startup Sync once and print the reconciliation report, without
    /// starting workers or the migration scheduler.
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("gpuctl=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Serve => gpuctl::run_server(&config).await?,
        Commands::Sync => {
            let plane = gpuctl::bootstrap(&config).await?;
            let report = gpuctl::run_startup_sync(&plane).await?;
            println!("adopted: {}, removed: {}", report.adopted, report.removed);
        }
    }

    Ok(())
}
