//! In-flight registry.

use crate::engine::ModuleId;
use crate::orchestrator::Orchestrator;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Orchestrators awaiting a transport outcome, keyed by attempt request id.
///
/// Keying by request id means a stale completion can only ever remove its own
/// entry, never the entry of the attempt that superseded it.
#[derive(Default)]
pub(crate) struct InFlightRegistry {
    entries: Mutex<BTreeMap<u64, Arc<Orchestrator>>>,
}

impl InFlightRegistry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<Orchestrator>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, request_id: u64, instance: Arc<Orchestrator>) {
        self.lock().insert(request_id, instance);
    }

    pub(crate) fn remove(&self, request_id: u64) -> Option<Arc<Orchestrator>> {
        self.lock().remove(&request_id)
    }

    /// Snapshot of every entry, oldest attempt first.
    pub(crate) fn all(&self) -> Vec<Arc<Orchestrator>> {
        self.lock().values().cloned().collect()
    }

    /// Snapshot of entries created by `module`, oldest attempt first.
    pub(crate) fn by_module(&self, module: ModuleId) -> Vec<Arc<Orchestrator>> {
        self.lock()
            .values()
            .filter(|instance| instance.module() == module)
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
