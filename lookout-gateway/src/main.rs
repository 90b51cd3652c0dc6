use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use lookout_gateway::Gateway;
use lookout_gateway::config::GatewayConfig;
use lookout_gateway::metadata::TcpMetadataSource;
use lookout_gateway::orchestrator::{FetchSettings, LogFetcher};
use lookout_gateway::registry::FunctionRegistry;
use lookout_gateway::resolver::{AdminStatusClient, WorkerResolver};
use lookout_gateway::watchdog::Watchdog;
use lookout_protocol::protocol::Request;
use lookout_protocol::server::{Server, ShutdownTx};
use tokio::sync::watch;
use tracing::{info, warn};

/// Lookout gateway - resolves function workers and fetches their logs
#[derive(Parser)]
#[command(name = "lookout-gateway", about = "Serve function log pages from remote workers")]
struct Args {
    /// Path to the YAML config file
    #[arg(short, long, env = "LOOKOUT_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
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

    let config = GatewayConfig::load(args.config.as_deref())?;
    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let registry = FunctionRegistry::shared(config.metadata.upsert_policy);

    if config.admin_url.is_none() {
        warn!("No admin_url configured; only pinned workers can be read");
    }
    let status = AdminStatusClient::new(
        config.admin_url.clone(),
        config.admin_token.clone(),
        config.admin_timeout,
    )?;
    let resolver = WorkerResolver::new(Arc::clone(&registry), status, config.staleness_window);
    let gateway = Arc::new(Gateway::new(LogFetcher::new(
        resolver,
        FetchSettings::from(&config),
    )));

    let (watchdog_tx, watchdog_rx) = watch::channel(false);
    let watchdog = match &config.metadata.address {
        Some(address) => {
            let source = TcpMetadataSource::new(address.clone(), config.metadata.connect_timeout);
            Some(
                Watchdog::new(source, Arc::clone(&registry), config.metadata.backoff)
                    .spawn(watchdog_rx),
            )
        }
        None => {
            warn!("No metadata.address configured; the function registry stays empty");
            None
        }
    };

    let handler = move |request: Request, _shutdown_tx: ShutdownTx| {
        let gateway = Arc::clone(&gateway);
        async move { gateway.handle(request).await }
    };
    let server = Server::bind(&config.listen, handler).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown.send(()).await;
        }
    });

    server.run().await?;

    let _ = watchdog_tx.send(true);
    if let Some(handle) = watchdog {
        let restarts = handle.await?;
        info!("Metadata subscriber restarted {} times", restarts);
    }
    info!("Gateway stopped");
    Ok(())
}
