//! Maps a function instance to the worker currently running it.
//!
//! The registry acts as a read-through cache in front of the admin status
//! endpoint: a cached placement younger than the staleness window is used
//! as is, anything older (or missing) triggers one status query.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lookout_protocol::protocol::FunctionId;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{ResolveError, StatusError};
use crate::registry::{ComponentType, FunctionRecord, InstanceStatus, SharedRegistry};

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Status document returned by the admin endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    #[serde(default)]
    pub num_instances: u32,
    #[serde(default)]
    pub num_running: u32,
    #[serde(default)]
    pub instances: Vec<InstanceReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceReport {
    pub instance_id: u32,
    #[serde(default)]
    pub status: InstanceState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub worker_id: String,
}

/// Authoritative source of function instance placements
pub trait StatusSource: Send + Sync + 'static {
    fn function_status(
        &self,
        id: &FunctionId,
        component: ComponentType,
    ) -> impl Future<Output = std::result::Result<FunctionStatus, StatusError>> + Send;
}

/// Queries `{base}/admin/v3/{component}/{tenant}/{namespace}/{name}/status`
#[derive(Debug, Clone)]
pub struct AdminStatusClient {
    http: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl AdminStatusClient {
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, StatusError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StatusError::Build)?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn status_url(&self, id: &FunctionId, component: ComponentType) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        Some(format!(
            "{}/admin/v3/{}/{}/{}/{}/status",
            base,
            component.admin_path(),
            id.tenant,
            id.namespace,
            id.name
        ))
    }
}

impl StatusSource for AdminStatusClient {
    async fn function_status(
        &self,
        id: &FunctionId,
        component: ComponentType,
    ) -> std::result::Result<FunctionStatus, StatusError> {
        let url = self
            .status_url(id, component)
            .ok_or(StatusError::NotConfigured)?;
        debug!("GET {}", url);

        let mut request = self
            .http
            .get(&url)
            .header("X-Request", "lookout-gateway");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| StatusError::Http {
            url: url.clone(),
            source,
        })?;
        if !response.status().is_success() {
            return Err(StatusError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        response
            .json::<FunctionStatus>()
            .await
            .map_err(|source| StatusError::Http { url, source })
    }
}

/// A function record together with the worker chosen for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub record: FunctionRecord,
    pub worker_id: String,
}

pub struct WorkerResolver<S> {
    registry: SharedRegistry,
    status: S,
    staleness_window: Duration,
}

impl<S: StatusSource> WorkerResolver<S> {
    pub fn new(registry: SharedRegistry, status: S, staleness_window: Duration) -> Self {
        Self {
            registry,
            status,
            staleness_window,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub async fn resolve(&self, id: &FunctionId, instance: u32) -> Result<Resolved> {
        let mut record = self
            .registry
            .get(id)
            .ok_or_else(|| ResolveError::FunctionNotFound(id.clone()))?;

        if let Some(cached) = record.instance(instance)
            && self.is_fresh(cached, Utc::now())
        {
            debug!(
                "Using cached worker {} for {} instance {}",
                cached.worker_id, id, instance
            );
            let worker_id = cached.worker_id.clone();
            return Ok(Resolved { record, worker_id });
        }

        let status = self
            .status
            .function_status(id, record.component)
            .await
            .map_err(|source| ResolveError::StatusQuery {
                function: id.clone(),
                source,
            })?;

        // An instance without a worker has not been placed yet
        let report = status
            .instances
            .into_iter()
            .find(|report| report.instance_id == instance && !report.status.worker_id.is_empty())
            .ok_or_else(|| ResolveError::InstanceNotFound {
                function: id.clone(),
                instance,
            })?;

        let fresh = InstanceStatus {
            instance_id: instance,
            running: report.status.running,
            worker_id: report.status.worker_id,
            last_query_time: Utc::now(),
        };
        if !self.registry.update_instance_worker(id, fresh.clone()) {
            debug!("{} was removed while resolving instance {}", id, instance);
            return Err(ResolveError::FunctionNotFound(id.clone()));
        }
        info!(
            "Resolved {} instance {} to worker {}",
            id, instance, fresh.worker_id
        );

        let worker_id = fresh.worker_id.clone();
        record.instances.insert(instance, fresh);
        Ok(Resolved { record, worker_id })
    }

    fn is_fresh(&self, cached: &InstanceStatus, now: DateTime<Utc>) -> bool {
        match (now - cached.last_query_time).to_std() {
            Ok(age) => age < self.staleness_window,
            // Queried "in the future": the clock stepped back, so the age is unknown
            Err(_) => false,
        }
    }
}
