//! Scheduler tick: pair queued jobs with free nodes and dispatch them.
//!
//! Pairing is synchronous. Every node is claimed and every paired job moved
//! to `assigned` before the first dispatch task is spawned, so two pairs in
//! the same tick can never race for one node.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinHandle;

use renderq_core::job::{JobStatus, RenderJob};
use renderq_core::node::Capability;
use renderq_core::scheduling::sort_for_dispatch;
use renderq_core::types::{JobId, NodeId};
use renderq_core::workflow;

use crate::error::DispatchError;
use crate::transition::{Shared, TerminalGuard};

/// A spawned dispatch for one `(job, node)` pair.
pub struct Dispatch {
    pub job_id: JobId,
    pub node_id: NodeId,
    handle: JoinHandle<()>,
}

impl Dispatch {
    /// Wait for the dispatch task to finish. The job's fate is already in
    /// the store when this returns.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(
                job_id = %self.job_id,
                node_id = %self.node_id,
                error = %e,
                "Dispatch task panicked",
            );
        }
    }
}

/// One scheduling pass. No-op while the scheduler is stopped.
pub(crate) fn tick(shared: &Arc<Shared>) -> Vec<Dispatch> {
    if !shared.is_running() {
        return Vec::new();
    }

    let mut queued = shared.store.list_by_status(JobStatus::Queued);
    if queued.is_empty() {
        return Vec::new();
    }
    sort_for_dispatch(&mut queued);

    let pairs = {
        let _pairing = shared.lock_pairing();
        pair_jobs(shared, group_by_capability(queued))
    };
    if pairs.is_empty() {
        return Vec::new();
    }
    tracing::debug!(pairs = pairs.len(), "Dispatching jobs");

    pairs
        .into_iter()
        .map(|(job, node_id)| {
            let job_id = job.id;
            let handle = tokio::spawn(dispatch(Arc::clone(shared), job, node_id.clone()));
            Dispatch {
                job_id,
                node_id,
                handle,
            }
        })
        .collect()
}

/// Split the sorted snapshot by capability, keeping queue order inside each
/// group and groups in order of their first job.
fn group_by_capability(jobs: Vec<RenderJob>) -> Vec<(Capability, Vec<RenderJob>)> {
    let mut groups: Vec<(Capability, Vec<RenderJob>)> = Vec::new();
    for job in jobs {
        let capability = job.capability();
        match groups.iter_mut().find(|(c, _)| *c == capability) {
            Some((_, group)) => group.push(job),
            None => groups.push((capability, vec![job])),
        }
    }
    groups
}

/// Claim nodes and assign jobs, head of each group first.
fn pair_jobs(
    shared: &Shared,
    groups: Vec<(Capability, Vec<RenderJob>)>,
) -> Vec<(RenderJob, NodeId)> {
    let mut claimed: HashSet<NodeId> = HashSet::new();
    let mut pairs = Vec::new();

    for (capability, jobs) in groups {
        let nodes = shared.pool.available_nodes(capability, &claimed);
        if nodes.is_empty() {
            continue;
        }
        let mut jobs = jobs.into_iter().peekable();

        'nodes: for node in nodes {
            while let Some(candidate) = jobs.peek() {
                let job_id = candidate.id;
                if !shared.pool.try_claim(&node.id, job_id, capability) {
                    // Someone else took the node; the job stays at the head.
                    continue 'nodes;
                }
                match shared.mark_assigned(job_id, &node.id) {
                    Some(job) => {
                        jobs.next();
                        claimed.insert(node.id.clone());
                        pairs.push((job, node.id.clone()));
                        continue 'nodes;
                    }
                    None => {
                        // The job left the queue since the snapshot.
                        shared.pool.release_job(&node.id, job_id);
                        jobs.next();
                    }
                }
            }
            break;
        }
    }
    pairs
}

async fn dispatch(shared: Arc<Shared>, job: RenderJob, node_id: NodeId) {
    if let Err(e) = submit_to_node(&shared, &job, &node_id).await {
        tracing::warn!(
            job_id = %job.id,
            node_id = %node_id,
            error = %e,
            "Dispatch failed",
        );
        shared.fail(job.id, &TerminalGuard::dispatching(&node_id), &e);
    }
}

async fn submit_to_node(shared: &Arc<Shared>, job: &RenderJob, node_id: &str) -> Result<(), DispatchError> {
    let endpoint = shared
        .endpoint_for(job, node_id)
        .ok_or_else(|| DispatchError::NoEndpoint(node_id.to_string()))?;

    let built = workflow::build(job, job.settings.workflow_kind, &BTreeMap::new())?;
    for warning in &built.warnings {
        tracing::warn!(job_id = %job.id, warning = %warning, "Workflow build warning");
    }

    let client_id = uuid::Uuid::new_v4().to_string();
    let backend_job_id = shared.backend.submit(&endpoint, &client_id, &built.graph).await?;
    tracing::debug!(
        job_id = %job.id,
        node_id,
        backend_job_id = %backend_job_id,
        workflow = %built.kind,
        seed = built.seed,
        estimated_cost = built.estimated_cost,
        "Workflow submitted",
    );

    if shared
        .mark_rendering(job.id, node_id, &backend_job_id, &client_id)
        .is_none()
    {
        tracing::warn!(
            job_id = %job.id,
            node_id,
            backend_job_id = %backend_job_id,
            "Job no longer assigned to node after submit, cancelling on backend",
        );
        if let Err(e) = shared.backend.cancel(&endpoint, &backend_job_id).await {
            tracing::debug!(backend_job_id = %backend_job_id, error = %e, "Backend cancel failed");
        }
        return Ok(());
    }

    if shared.is_running() {
        shared.tracker.connect(shared, node_id, &endpoint, &client_id);
    }
    Ok(())
}
