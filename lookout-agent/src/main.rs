use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lookout_agent::{DEFAULT_LOG_ROOT, LogTailService};
use lookout_protocol::protocol::Request;
use lookout_protocol::server::{Server, ShutdownTx};
use tracing::info;

/// Lookout agent - serves function log pages on a worker
#[derive(Parser)]
#[command(name = "lookout-agent", about = "Serve line-safe log pages from this worker")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "LOOKOUT_AGENT_LISTEN", default_value = "0.0.0.0:4040")]
    listen: String,

    /// Directory holding the function log files
    #[arg(long, env = "LOOKOUT_LOG_ROOT", default_value = DEFAULT_LOG_ROOT)]
    log_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let service = LogTailService::new(&args.log_root)
        .with_context(|| format!("cannot serve logs from {}", args.log_root.display()))?;
    info!("Serving logs under {}", service.log_root().display());

    let handler = move |request: Request, _shutdown_tx: ShutdownTx| {
        let service = service.clone();
        async move { service.handle(request).await }
    };

    let server = Server::bind(&args.listen, handler).await?;
    server.run().await?;

    info!("Agent stopped");
    Ok(())
}
