//! In-memory stand-in for the admin status endpoint

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lookout_gateway::errors::StatusError;
use lookout_gateway::registry::ComponentType;
use lookout_gateway::resolver::{FunctionStatus, InstanceReport, InstanceState, StatusSource};
use lookout_protocol::protocol::FunctionId;
use parking_lot::Mutex;

/// Reports whatever placements the test assigns with [`PlacedStatus::place`].
///
/// Clones share state, so a test can keep one handle while the gateway owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct PlacedStatus {
    placements: Arc<Mutex<HashMap<(FunctionId, u32), String>>>,
    calls: Arc<AtomicUsize>,
}

impl PlacedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `instance` of `id` as running on `worker`
    pub fn place(&self, id: &FunctionId, instance: u32, worker: &str) {
        self.placements
            .lock()
            .insert((id.clone(), instance), worker.to_string());
    }

    /// Number of status queries served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatusSource for PlacedStatus {
    async fn function_status(
        &self,
        id: &FunctionId,
        _component: ComponentType,
    ) -> Result<FunctionStatus, StatusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let placements = self.placements.lock();
        let instances: Vec<InstanceReport> = placements
            .iter()
            .filter(|((function, _), _)| function == id)
            .map(|((_, instance), worker)| InstanceReport {
                instance_id: *instance,
                status: InstanceState {
                    running: true,
                    error: String::new(),
                    worker_id: worker.clone(),
                },
            })
            .collect();
        Ok(FunctionStatus {
            num_instances: instances.len() as u32,
            num_running: instances.len() as u32,
            instances,
        })
    }
}
