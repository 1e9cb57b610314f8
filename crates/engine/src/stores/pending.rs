//! The pending-execution table: the one place the two identifier spaces
//! (engine-assigned execution ids, bridge-assigned client ids) are joined.
//!
//! Entries are created by the correlator when a submission is accepted and
//! destroyed on a terminal event or owning-client disconnect. Accessed from
//! HTTP handlers and the event-stream listener, so everything is behind one
//! lock.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use nodebridge_shared::{ClientId, ExecutionId, NodeId};

/// Lifecycle of an in-flight execution. Terminal states are not stored;
/// reaching one removes the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Accepted by the engine, no executing event seen yet.
    Submitted,
    /// At least one executing event observed.
    Running,
}

/// One in-flight execution and its owner.
#[derive(Debug, Clone)]
pub struct PendingExecution {
    pub execution_id: ExecutionId,
    pub client_id: ClientId,
    pub output_node_ids: HashSet<NodeId>,
    pub phase: ExecutionPhase,
}

#[derive(Default)]
pub struct PendingExecutions {
    inner: Mutex<HashMap<ExecutionId, PendingExecution>>,
}

impl PendingExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending execution. Returns false (and changes
    /// nothing) if an entry for this execution id already exists: at most
    /// one correlation per execution id, ever.
    pub fn register(
        &self,
        execution_id: ExecutionId,
        client_id: ClientId,
        output_node_ids: HashSet<NodeId>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.contains_key(&execution_id) {
            return false;
        }
        inner.insert(
            execution_id.clone(),
            PendingExecution {
                execution_id,
                client_id,
                output_node_ids,
                phase: ExecutionPhase::Submitted,
            },
        );
        true
    }

    /// Transition Submitted -> Running. Idempotent; unknown ids are ignored.
    pub fn mark_running(&self, execution_id: &ExecutionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = inner.get_mut(execution_id) {
            entry.phase = ExecutionPhase::Running;
        }
    }

    pub fn get(&self, execution_id: &ExecutionId) -> Option<PendingExecution> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.get(execution_id).cloned()
    }

    /// Remove on a terminal event.
    pub fn remove(&self, execution_id: &ExecutionId) -> Option<PendingExecution> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.remove(execution_id)
    }

    /// Drop every entry owned by a disconnected client. Returns the removed
    /// execution ids; no relay is ever attempted for them again.
    pub fn remove_for_client(&self, client_id: ClientId) -> Vec<ExecutionId> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let doomed: Vec<ExecutionId> = inner
            .values()
            .filter(|entry| entry.client_id == client_id)
            .map(|entry| entry.execution_id.clone())
            .collect();
        for id in &doomed {
            inner.remove(id);
        }
        doomed
    }

    /// Drain the whole table (event stream lost). Returns the entries so
    /// the caller can notify owners.
    pub fn drain(&self) -> Vec<PendingExecution> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.drain().map(|(_, entry)| entry).collect()
    }

    /// Clients that currently own at least one pending execution.
    pub fn owners(&self) -> HashSet<ClientId> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.values().map(|entry| entry.client_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.is_empty()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.len()
    }
}
