//! In-memory cache of deployed functions and where their instances run.

use chrono::{DateTime, Utc};
use lookout_protocol::protocol::{FunctionId, FunctionInfo, InstanceInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::metadata::{EventKind, MetadataEvent};

/// Kind of deployed unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    #[default]
    Function,
    Source,
    Sink,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Function => "function",
            ComponentType::Source => "source",
            ComponentType::Sink => "sink",
        }
    }

    /// Path segment used by the admin status endpoint
    pub fn admin_path(&self) -> &'static str {
        match self {
            ComponentType::Function => "functions",
            ComponentType::Source => "sources",
            ComponentType::Sink => "sinks",
        }
    }
}

/// What to do with a metadata event for a function already in the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertPolicy {
    /// The first record seen for a function is kept
    #[default]
    KeepFirst,
    /// Later events update component and parallelism; cached instance
    /// placements are kept
    Replace,
}

/// Last known placement of one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub instance_id: u32,
    pub running: bool,
    pub worker_id: String,
    pub last_query_time: DateTime<Utc>,
}

impl InstanceStatus {
    pub fn to_instance_info(&self) -> InstanceInfo {
        InstanceInfo {
            instance_id: self.instance_id,
            running: self.running,
            worker_id: self.worker_id.clone(),
            last_query_time: self.last_query_time.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    pub id: FunctionId,
    pub component: ComponentType,
    pub parallelism: u32,
    pub instances: HashMap<u32, InstanceStatus>,
}

impl FunctionRecord {
    pub fn new(id: FunctionId, component: ComponentType, parallelism: u32) -> Self {
        Self {
            id,
            component,
            parallelism,
            instances: HashMap::new(),
        }
    }

    pub fn instance(&self, instance_id: u32) -> Option<&InstanceStatus> {
        self.instances.get(&instance_id)
    }

    pub fn to_function_info(&self) -> FunctionInfo {
        let mut instances: Vec<InstanceInfo> = self
            .instances
            .values()
            .map(InstanceStatus::to_instance_info)
            .collect();
        instances.sort_by_key(|i| i.instance_id);
        FunctionInfo {
            function: self.id.clone(),
            component: self.component.as_str().to_string(),
            parallelism: self.parallelism,
            instances,
        }
    }
}

/// Registry of known functions, guarded by a single read/write lock.
///
/// All access goes through the methods below; no I/O happens while the
/// lock is held.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<FunctionId, FunctionRecord>>,
    policy: UpsertPolicy,
}

pub type SharedRegistry = Arc<FunctionRegistry>;

impl FunctionRegistry {
    pub fn new(policy: UpsertPolicy) -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn shared(policy: UpsertPolicy) -> SharedRegistry {
        Arc::new(Self::new(policy))
    }

    pub fn policy(&self) -> UpsertPolicy {
        self.policy
    }

    /// Insert `record`, or under [`UpsertPolicy::Replace`] update the
    /// existing one. Returns whether the registry changed.
    pub fn upsert(&self, record: FunctionRecord) -> bool {
        let mut functions = self.functions.write();
        match functions.get_mut(&record.id) {
            None => {
                functions.insert(record.id.clone(), record);
                true
            }
            Some(_) if self.policy == UpsertPolicy::KeepFirst => false,
            Some(existing) => {
                let changed = existing.component != record.component
                    || existing.parallelism != record.parallelism;
                existing.component = record.component;
                existing.parallelism = record.parallelism;
                changed
            }
        }
    }

    /// Record a freshly queried placement for one instance.
    ///
    /// Returns false if the function is unknown. A status older than the
    /// cached one is ignored so `last_query_time` never moves backwards.
    pub fn update_instance_worker(&self, id: &FunctionId, status: InstanceStatus) -> bool {
        let mut functions = self.functions.write();
        let Some(record) = functions.get_mut(id) else {
            return false;
        };
        match record.instances.get_mut(&status.instance_id) {
            Some(existing) if existing.last_query_time > status.last_query_time => {
                debug!(
                    "Ignoring stale placement for {} instance {}",
                    id, status.instance_id
                );
            }
            Some(existing) => *existing = status,
            None => {
                record.instances.insert(status.instance_id, status);
            }
        }
        true
    }

    pub fn get(&self, id: &FunctionId) -> Option<FunctionRecord> {
        self.functions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.functions.read().contains_key(id)
    }

    pub fn remove(&self, id: &FunctionId) -> Option<FunctionRecord> {
        self.functions.write().remove(id)
    }

    /// Number of functions registered under `tenant`
    pub fn count_by_tenant(&self, tenant: &str) -> usize {
        self.functions
            .read()
            .keys()
            .filter(|id| id.tenant == tenant)
            .count()
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }

    /// Apply one metadata stream event
    pub fn apply(&self, event: &MetadataEvent) {
        let id = event.function_id();
        match event.kind {
            EventKind::Upsert => {
                let record = FunctionRecord::new(id, event.component, event.parallelism);
                if self.upsert(record) {
                    debug!("Registered {} {}", event.component.as_str(), event.function_id());
                }
            }
            EventKind::Delete => {
                if self.remove(&id).is_some() {
                    debug!("Removed {}", id);
                }
            }
        }
    }
}
