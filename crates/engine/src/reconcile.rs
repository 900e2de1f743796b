//! History poll for active jobs.
//!
//! Backstop for the push channel: every active job with a backend job id
//! has its history read from the owning node. A finished or failed record
//! settles the job through the same guarded transition the push handler
//! uses. Jobs with no activity for longer than the stall timeout are failed
//! and their prompt is cancelled on the node.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use renderq_core::backend::HistoryOutcome;
use renderq_core::job::{JobStatus, RenderJob};
use renderq_core::types::Timestamp;

use crate::error::DispatchError;
use crate::transition::{Shared, TerminalGuard};

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// History records read successfully.
    pub polled: usize,
    pub completed: usize,
    /// Failures applied from history, including ones that re-queued.
    pub failed: usize,
    pub stalled: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Unchanged,
    Completed,
    Failed,
    Stalled,
}

pub(crate) async fn reconcile(shared: &Arc<Shared>) -> ReconcileReport {
    let active = shared.store.list_active();
    if active.is_empty() {
        return ReconcileReport::default();
    }
    let now = Utc::now();

    let results = join_all(active.into_iter().map(|job| reconcile_job(shared, job, now))).await;

    let mut report = ReconcileReport::default();
    for (polled, settled) in results {
        report.polled += usize::from(polled);
        match settled {
            Settled::Unchanged => {}
            Settled::Completed => report.completed += 1,
            Settled::Failed => report.failed += 1,
            Settled::Stalled => report.stalled += 1,
        }
    }
    if !report.is_empty() {
        tracing::debug!(
            polled = report.polled,
            completed = report.completed,
            failed = report.failed,
            stalled = report.stalled,
            "Reconciliation pass",
        );
    }
    report
}

/// Returns whether history was read, and what changed.
async fn reconcile_job(shared: &Shared, job: RenderJob, now: Timestamp) -> (bool, Settled) {
    let Some(node_id) = job.assigned_node.clone() else {
        return (false, Settled::Unchanged);
    };

    let Some(backend_job_id) = job.backend_job_id.clone() else {
        // Still dispatching.
        let guard = TerminalGuard::dispatching(&node_id);
        return (false, check_stall(shared, &job, &guard, None, now).await);
    };
    let guard = TerminalGuard::running(&node_id, &backend_job_id);

    let Some(endpoint) = shared.endpoint_for(&job, &node_id) else {
        tracing::warn!(
            job_id = %job.id,
            node_id = %node_id,
            "Active job's node has no endpoint",
        );
        let err = DispatchError::NoEndpoint(node_id.clone());
        return match shared.fail(job.id, &guard, &err) {
            Some(_) => (false, Settled::Failed),
            None => (false, Settled::Unchanged),
        };
    };

    match shared.backend.fetch_history(&endpoint, &backend_job_id).await {
        Ok(HistoryOutcome::Pending) => {
            let prompt = Some((endpoint.as_str(), backend_job_id.as_str()));
            (true, check_stall(shared, &job, &guard, prompt, now).await)
        }
        Ok(outcome) => {
            let settled = match shared.settle_from_history(job.id, &guard, &endpoint, outcome) {
                Some(job) if job.status == JobStatus::Completed => Settled::Completed,
                Some(_) => Settled::Failed,
                None => Settled::Unchanged,
            };
            (true, settled)
        }
        Err(e) => {
            tracing::warn!(
                job_id = %job.id,
                node_id = %node_id,
                backend_job_id = %backend_job_id,
                error = %e,
                "History poll failed",
            );
            let prompt = Some((endpoint.as_str(), backend_job_id.as_str()));
            (false, check_stall(shared, &job, &guard, prompt, now).await)
        }
    }
}

/// Fails a job idle past the stall timeout. `prompt` is the endpoint and
/// backend job id to cancel once the failure has been applied.
async fn check_stall(
    shared: &Shared,
    job: &RenderJob,
    guard: &TerminalGuard,
    prompt: Option<(&str, &str)>,
    now: Timestamp,
) -> Settled {
    let Some(timeout) = shared.config.stall_timeout else {
        return Settled::Unchanged;
    };
    let last = job
        .last_activity_at
        .or(job.started_at)
        .unwrap_or(job.created_at);
    let idle = (now - last).to_std().unwrap_or_default();
    if idle <= timeout {
        return Settled::Unchanged;
    }

    if shared
        .fail(job.id, guard, &DispatchError::Stalled(timeout.as_secs()))
        .is_none()
    {
        return Settled::Unchanged;
    }

    if let Some((endpoint, backend_job_id)) = prompt {
        if let Err(e) = shared.backend.cancel(endpoint, backend_job_id).await {
            tracing::debug!(
                job_id = %job.id,
                backend_job_id = %backend_job_id,
                error = %e,
                "Cancel of stalled prompt failed",
            );
        }
    }
    Settled::Stalled
}
