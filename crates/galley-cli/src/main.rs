//! galley CLI entry point.
//!
//! Exactly two commands belong to the core: `init-schema` (connect +
//! migrate) and `run` (serve). Everything else is an external concern.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use galley_config::Config;

#[derive(Parser)]
#[command(name = "galley")]
#[command(about = "Restaurant back-office automation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the database schema.
    InitSchema,

    /// Run the service: scheduler, webhook endpoint, chat dispatch.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();
    // Fail fast: every required variable is validated before any work.
    let config = Config::from_env()?;

    match cli.cmd {
        Commands::InitSchema => {
            let pool = galley_db::connect(&config.database_url).await?;
            galley_db::migrate(&pool).await?;
            let status = galley_db::status(&pool).await?;
            info!(ok = status.ok, has_schema = status.has_schema, "schema ready");
            println!("schema ready (ok={}, has_schema={})", status.ok, status.has_schema);
        }
        Commands::Run => {
            galley_daemon::serve(config, galley_daemon::adapters::unconfigured()).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
