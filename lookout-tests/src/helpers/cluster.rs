//! One agent and one gateway wired together on loopback ports

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lookout_agent::LogTailService;
use lookout_gateway::Gateway;
use lookout_gateway::orchestrator::{FetchSettings, LogFetcher};
use lookout_gateway::registry::{ComponentType, FunctionRecord, FunctionRegistry, SharedRegistry};
use lookout_gateway::resolver::WorkerResolver;
use lookout_protocol::client::Client;
use lookout_protocol::protocol::{FunctionId, Request};
use lookout_protocol::server::{Server, ShutdownTx};
use tempfile::TempDir;

use super::status::PlacedStatus;

/// The agent listens on loopback, so this is the worker id that reaches it
pub const LOOPBACK_WORKER: &str = "127.0.0.1";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestCluster {
    log_root: TempDir,
    agent_address: SocketAddr,
    gateway_address: SocketAddr,
    gateway: Arc<Gateway<PlacedStatus>>,
    status: PlacedStatus,
    agent_shutdown: ShutdownTx,
    gateway_shutdown: ShutdownTx,
}

impl TestCluster {
    /// Start with the default three minute staleness window
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with_staleness(Duration::from_secs(180)).await
    }

    pub async fn start_with_staleness(staleness_window: Duration) -> std::io::Result<Self> {
        Self::start_with_registry(
            FunctionRegistry::shared(Default::default()),
            staleness_window,
        )
        .await
    }

    /// Start around an existing registry, e.g. one fed by a metadata watchdog
    pub async fn start_with_registry(
        registry: SharedRegistry,
        staleness_window: Duration,
    ) -> std::io::Result<Self> {
        let log_root = tempfile::tempdir()?;

        let service = LogTailService::new(log_root.path()).map_err(std::io::Error::other)?;
        let agent_handler = move |request: Request, _shutdown_tx: ShutdownTx| {
            let service = service.clone();
            async move { service.handle(request).await }
        };
        let agent = Server::bind("127.0.0.1:0", agent_handler)
            .await
            .map_err(std::io::Error::other)?;
        let agent_address = agent.local_addr().map_err(std::io::Error::other)?;
        let agent_shutdown = agent.shutdown_handle();
        tokio::spawn(agent.run());

        let status = PlacedStatus::new();
        let resolver = WorkerResolver::new(registry, status.clone(), staleness_window);
        let settings = FetchSettings {
            worker_domain: String::new(),
            log_server_port: agent_address.port(),
            log_root: log_root.path().to_path_buf(),
            dial_timeout: Duration::from_secs(2),
            request_timeout: CLIENT_TIMEOUT,
        };
        let gateway = Arc::new(Gateway::new(LogFetcher::new(resolver, settings)));

        let handler_gateway = Arc::clone(&gateway);
        let gateway_handler = move |request: Request, _shutdown_tx: ShutdownTx| {
            let gateway = Arc::clone(&handler_gateway);
            async move { gateway.handle(request).await }
        };
        let server = Server::bind("127.0.0.1:0", gateway_handler)
            .await
            .map_err(std::io::Error::other)?;
        let gateway_address = server.local_addr().map_err(std::io::Error::other)?;
        let gateway_shutdown = server.shutdown_handle();
        tokio::spawn(server.run());

        Ok(Self {
            log_root,
            agent_address,
            gateway_address,
            gateway,
            status,
            agent_shutdown,
            gateway_shutdown,
        })
    }

    pub fn log_root(&self) -> &Path {
        self.log_root.path()
    }

    pub fn agent_address(&self) -> SocketAddr {
        self.agent_address
    }

    pub fn gateway_address(&self) -> SocketAddr {
        self.gateway_address
    }

    pub fn status(&self) -> &PlacedStatus {
        &self.status
    }

    pub fn registry(&self) -> &SharedRegistry {
        self.gateway.registry()
    }

    /// Where the agent expects `instance` of `id` to write its log
    pub fn log_path(&self, id: &FunctionId, instance: u32) -> PathBuf {
        id.log_path(self.log_root.path(), instance)
    }

    /// Register `id` with the gateway and place every instance on the agent
    pub fn deploy(&self, id: &FunctionId, parallelism: u32) {
        self.registry()
            .upsert(FunctionRecord::new(id.clone(), ComponentType::Function, parallelism));
        for instance in 0..parallelism {
            self.status.place(id, instance, LOOPBACK_WORKER);
        }
    }

    pub async fn gateway_client(&self) -> std::io::Result<Client> {
        Client::connect(&self.gateway_address.to_string(), CLIENT_TIMEOUT)
            .await
            .map_err(std::io::Error::other)
    }

    pub async fn agent_client(&self) -> std::io::Result<Client> {
        Client::connect(&self.agent_address.to_string(), CLIENT_TIMEOUT)
            .await
            .map_err(std::io::Error::other)
    }

    pub fn timeout(&self) -> Duration {
        CLIENT_TIMEOUT
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        let _ = self.agent_shutdown.try_send(());
        let _ = self.gateway_shutdown.try_send(());
    }
}
