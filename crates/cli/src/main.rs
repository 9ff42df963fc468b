use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use grid_hedge_orchestrator::SessionRegistry;
use grid_hedge_web_api::ApiServer;

#[derive(Parser)]
#[command(name = "grid-hedge")]
#[command(about = "Multi-tenant grid hedging engine for USDT-M perpetual futures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session manager with the HTTP control API
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        addr: String,
        /// Shared secret for the admin endpoints (empty disables them)
        #[arg(long, env = "ADMIN_SECRET", default_value = "")]
        admin_secret: String,
        /// Maximum concurrent sessions
        #[arg(long, env = "MAX_SESSIONS", default_value_t = 100)]
        max_sessions: usize,
        /// Seconds each session gets to stop during shutdown
        #[arg(long, default_value_t = 30)]
        shutdown_grace_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            addr,
            admin_secret,
            max_sessions,
            shutdown_grace_secs,
        } => {
            serve(&addr, admin_secret, max_sessions, shutdown_grace_secs).await?;
        }
    }

    Ok(())
}

async fn serve(
    addr: &str,
    admin_secret: String,
    max_sessions: usize,
    shutdown_grace_secs: u64,
) -> anyhow::Result<()> {
    let registry = Arc::new(SessionRegistry::with_capacity(max_sessions));
    let server = ApiServer::new(registry.clone(), admin_secret);

    tracing::info!(%addr, max_sessions, "starting session manager");

    tokio::select! {
        result = server.serve(addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, stopping sessions");
            registry
                .shutdown_all(Duration::from_secs(shutdown_grace_secs))
                .await;
        }
    }

    tracing::info!("session manager stopped");
    Ok(())
}
