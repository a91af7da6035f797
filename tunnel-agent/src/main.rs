//! Tunnel Agent Binary Entry Point

use clap::Parser;
use tunnel_agent::{init_logging, load_settings, run_agent, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_logging(&settings.logging)?;

    if let Err(e) = run_agent(args, settings).await {
        tracing::error!("Tunnel agent failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
