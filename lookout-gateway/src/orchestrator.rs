//! Client-facing log fetch: resolve the worker, dial its agent, read a page.

use std::path::PathBuf;
use std::time::Duration;

use lookout_protocol::client::Client;
use lookout_protocol::protocol::{
    FunctionId, LogPage, LogQuery, MAX_PAGE_BYTES, ReadRequest, Response, ResponseData,
};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::errors::FetchError;
use crate::resolver::{StatusSource, WorkerResolver};

pub type Result<T> = std::result::Result<T, FetchError>;

/// Where and how to reach the log agents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub worker_domain: String,
    pub log_server_port: u16,
    pub log_root: PathBuf,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
}

impl From<&GatewayConfig> for FetchSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            worker_domain: config.worker_domain.clone(),
            log_server_port: config.log_server_port,
            log_root: config.log_root.clone(),
            dial_timeout: config.dial_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

pub struct LogFetcher<S> {
    resolver: WorkerResolver<S>,
    settings: FetchSettings,
}

impl<S: StatusSource> LogFetcher<S> {
    pub fn new(resolver: WorkerResolver<S>, settings: FetchSettings) -> Self {
        Self { resolver, settings }
    }

    pub fn resolver(&self) -> &WorkerResolver<S> {
        &self.resolver
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Reject queries that cannot be served, before any network call
    pub fn validate(query: &LogQuery) -> Result<()> {
        if query.bytes <= 0 {
            return Err(FetchError::Validation("bytes must be a positive number"));
        }
        if query.bytes > MAX_PAGE_BYTES {
            return Err(FetchError::Validation("bytes must not exceed 8 MiB"));
        }
        if query.forward_position > 0 && query.backward_position > 0 {
            return Err(FetchError::Validation(
                "forward and backward positions cannot both be set",
            ));
        }
        Ok(())
    }

    /// `{worker_id}{worker_domain}:{port}`
    pub fn worker_address(&self, worker_id: &str) -> String {
        format!(
            "{}{}:{}",
            worker_id, self.settings.worker_domain, self.settings.log_server_port
        )
    }

    /// Fetch one page of `instance`'s log. A non-empty `worker_override`
    /// skips resolution.
    pub async fn fetch_log(
        &self,
        id: &FunctionId,
        instance: u32,
        worker_override: Option<&str>,
        query: &LogQuery,
    ) -> Result<LogPage> {
        Self::validate(query)?;

        let worker_id = match worker_override.filter(|w| !w.is_empty()) {
            Some(worker) => {
                debug!("Using pinned worker {} for {} instance {}", worker, id, instance);
                worker.to_string()
            }
            None => self.resolver.resolve(id, instance).await?.worker_id,
        };

        let address = self.worker_address(&worker_id);
        let request = ReadRequest {
            file: id
                .log_path(&self.settings.log_root, instance)
                .to_string_lossy()
                .into_owned(),
            direction: query.effective_direction(),
            bytes: query.bytes,
            forward_index: query.forward_position,
            backward_index: query.backward_position,
        };
        debug!(
            "Reading {} {} from {} (fwd={} bwd={})",
            request.file, request.direction, address, request.forward_index, request.backward_index
        );

        let transport = |source| FetchError::Transport {
            address: address.clone(),
            source,
        };
        let client = Client::connect(&address, self.settings.dial_timeout)
            .await
            .map_err(transport)?;
        let response = client
            .read_log(request, self.settings.request_timeout)
            .await
            .map_err(transport)?;

        match response {
            Response::Ok {
                data: Some(ResponseData::Page(page)),
                ..
            } => Ok(page),
            Response::Error { kind, message } => {
                warn!("Worker {} failed to read log of {}: {}", address, id, message);
                Err(FetchError::Remote {
                    address,
                    kind,
                    message,
                })
            }
            _ => Err(FetchError::UnexpectedResponse { address }),
        }
    }
}
