//! Node pool manager: which job each node is running.
//!
//! The local claim map is the scheduler's source of truth for node
//! occupancy; registry busy flags mirror it so other consumers of the
//! registry see the same picture. Claims are compare-and-set under one
//! lock, and the registry flag is flipped while that lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use renderq_core::node::{Capability, ComputeNode, NodeRegistry, NodeStatus};
use renderq_core::types::{JobId, NodeId};

use crate::store::JobStore;

#[derive(Debug, Clone, Copy)]
struct Claim {
    job_id: JobId,
    capability: Capability,
}

/// What a sync pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Nodes whose tracked job was no longer active on them.
    pub released: Vec<NodeId>,
    /// Registry busy flags cleared because nothing was tracked locally.
    pub forced_available: Vec<(NodeId, Capability)>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.forced_available.is_empty()
    }
}

pub struct NodePoolManager {
    registry: Arc<dyn NodeRegistry>,
    claims: Mutex<HashMap<NodeId, Claim>>,
}

impl NodePoolManager {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            registry,
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, Claim>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Nodes that declare `capability`, are free in the registry, track no
    /// local job and are not in `exclude`. Registry order.
    pub fn available_nodes(
        &self,
        capability: Capability,
        exclude: &HashSet<NodeId>,
    ) -> Vec<ComputeNode> {
        let claims = self.lock();
        self.registry
            .list_capable_available_nodes(capability)
            .into_iter()
            .filter(|n| !claims.contains_key(&n.id) && !exclude.contains(&n.id))
            .collect()
    }

    /// Claim `node_id` for `job_id`. Fails when the node already tracks a
    /// job or the registry reports it busy for `capability`.
    pub fn try_claim(&self, node_id: &str, job_id: JobId, capability: Capability) -> bool {
        let mut claims = self.lock();
        if claims.contains_key(node_id) || self.registry.is_busy(node_id, capability) {
            return false;
        }
        claims.insert(node_id.to_string(), Claim { job_id, capability });
        self.registry.mark_busy(node_id, capability);
        true
    }

    /// Re-establish a claim for a job that is already active on `node_id`
    /// (scheduler restart). Ignores the registry flag, which the previous
    /// run may have left set.
    pub fn adopt(&self, node_id: &str, job_id: JobId, capability: Capability) -> bool {
        let mut claims = self.lock();
        if claims.contains_key(node_id) {
            return claims.get(node_id).is_some_and(|c| c.job_id == job_id);
        }
        claims.insert(node_id.to_string(), Claim { job_id, capability });
        self.registry.mark_busy(node_id, capability);
        true
    }

    /// Free `node_id` only if it is still running `job_id`. Releasing a
    /// free node is a no-op.
    pub fn release_job(&self, node_id: &str, job_id: JobId) -> bool {
        let mut claims = self.lock();
        match claims.get(node_id) {
            Some(claim) if claim.job_id == job_id => {
                let capability = claim.capability;
                claims.remove(node_id);
                self.registry.mark_available(node_id, capability);
                true
            }
            _ => false,
        }
    }

    pub fn current_job(&self, node_id: &str) -> Option<JobId> {
        self.lock().get(node_id).map(|c| c.job_id)
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        let claims = self.lock();
        self.registry
            .list_nodes()
            .into_iter()
            .map(|node| {
                let current_job = claims.get(&node.id).map(|c| c.job_id);
                NodeStatus {
                    busy: current_job.is_some() || !node.busy.is_empty(),
                    current_job,
                    node_id: node.id,
                    name: node.name,
                }
            })
            .collect()
    }

    /// Drop every claim and mark the nodes available.
    pub fn clear(&self) -> Vec<NodeId> {
        let mut claims = self.lock();
        let mut released = Vec::with_capacity(claims.len());
        for (node_id, claim) in claims.drain() {
            self.registry.mark_available(&node_id, claim.capability);
            released.push(node_id);
        }
        released
    }

    /// Reconcile local claims against the store and registry.
    ///
    /// Releases claims whose job is gone, inactive or moved to another
    /// node, and clears registry busy flags no local claim accounts for.
    /// Never creates or deletes jobs.
    pub fn sync(&self, store: &dyn JobStore) -> SyncReport {
        let mut claims = self.lock();
        let mut report = SyncReport::default();

        let stale: Vec<NodeId> = claims
            .iter()
            .filter(|(node_id, claim)| {
                !store.get(claim.job_id).is_some_and(|job| {
                    job.is_active() && job.assigned_node.as_deref() == Some(node_id.as_str())
                })
            })
            .map(|(node_id, _)| node_id.clone())
            .collect();
        for node_id in stale {
            if let Some(claim) = claims.remove(&node_id) {
                self.registry.mark_available(&node_id, claim.capability);
                tracing::warn!(
                    node_id = %node_id,
                    job_id = %claim.job_id,
                    "Released node holding an inactive job",
                );
                report.released.push(node_id);
            }
        }

        for node in self.registry.list_nodes() {
            let claimed = claims.get(&node.id).map(|c| c.capability);
            for capability in node.busy {
                if claimed != Some(capability) {
                    self.registry.mark_available(&node.id, capability);
                    tracing::warn!(
                        node_id = %node.id,
                        capability = %capability,
                        "Cleared stale busy flag",
                    );
                    report.forced_available.push((node.id.clone(), capability));
                }
            }
        }

        report
    }
}
