//! Shared scheduler state and the guarded job transitions.
//!
//! Every status change after submission happens here, through the store's
//! compare-and-set. [`Shared::apply_terminal_transition`] is the only way
//! out of `assigned`/`rendering`; it commits only while the job is still
//! active on the same node with the same backend job id, so duplicate
//! completion or failure signals from the push and poll channels are
//! no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use renderq_core::backend::{select_output_urls, HistoryOutcome, RenderBackend};
use renderq_core::job::{JobStatus, RenderJob};
use renderq_core::retry::{self, RetryDecision};
use renderq_core::types::{JobId, NodeId};
use renderq_events::{EventBus, SchedulerEvent};

use crate::config::SchedulerConfig;
use crate::error::DispatchError;
use crate::pool::{NodePoolManager, SyncReport};
use crate::progress::ProgressTracker;
use crate::store::JobStore;

/// State shared by the facade, the loops and spawned tasks.
pub(crate) struct Shared {
    pub store: Arc<dyn JobStore>,
    pub pool: NodePoolManager,
    pub tracker: ProgressTracker,
    pub backend: Arc<dyn RenderBackend>,
    pub events: Arc<EventBus>,
    pub config: SchedulerConfig,
    pub running: AtomicBool,
    /// Held while a tick claims nodes and assigns jobs, and during node
    /// sync. A claim whose job is not yet `assigned` must not be seen by
    /// the sync pass.
    pub pairing: Mutex<()>,
}

/// Identifies the attempt a terminal signal belongs to.
#[derive(Debug, Clone)]
pub(crate) struct TerminalGuard {
    pub node_id: NodeId,
    /// `None` while dispatching: the job must not have a backend id yet.
    pub backend_job_id: Option<String>,
}

impl TerminalGuard {
    pub fn dispatching(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            backend_job_id: None,
        }
    }

    pub fn running(node_id: &str, backend_job_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            backend_job_id: Some(backend_job_id.to_string()),
        }
    }

    fn matches(&self, job: &RenderJob) -> bool {
        job.is_active()
            && job.assigned_node.as_deref() == Some(self.node_id.as_str())
            && job.backend_job_id == self.backend_job_id
    }
}

#[derive(Debug, Clone)]
pub(crate) enum TerminalOutcome {
    Completed {
        output_url: Option<String>,
        thumbnail_url: Option<String>,
    },
    Failed {
        message: String,
        retryable: bool,
    },
}

impl TerminalOutcome {
    pub fn from_error(err: &DispatchError) -> Self {
        TerminalOutcome::Failed {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl Shared {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::SeqCst)
    }

    pub fn publish(&self, job: &RenderJob) {
        self.events.publish(SchedulerEvent::job_changed(job.clone()));
    }

    // ---------------------------------------------------------------------
    // Forward transitions
    // ---------------------------------------------------------------------

    /// `queued -> assigned` on `node_id`, counting a new attempt.
    pub fn mark_assigned(&self, job_id: JobId, node_id: &str) -> Option<RenderJob> {
        let now = Utc::now();
        let job = self
            .store
            .update(job_id, &mut |job| retry::begin_attempt(job, node_id, now))?;
        tracing::info!(
            job_id = %job.id,
            node_id,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            "Job assigned",
        );
        self.publish(&job);
        Some(job)
    }

    /// `assigned -> rendering` once the node accepted the graph.
    pub fn mark_rendering(
        &self,
        job_id: JobId,
        node_id: &str,
        backend_job_id: &str,
        client_id: &str,
    ) -> Option<RenderJob> {
        let now = Utc::now();
        let job = self.store.update(job_id, &mut |job| {
            if job.status != JobStatus::Assigned
                || job.assigned_node.as_deref() != Some(node_id)
                || job.backend_job_id.is_some()
            {
                return false;
            }
            job.status = JobStatus::Rendering;
            job.started_at = Some(now);
            job.last_activity_at = Some(now);
            job.backend_job_id = Some(backend_job_id.to_string());
            job.client_id = Some(client_id.to_string());
            true
        })?;
        tracing::info!(
            job_id = %job.id,
            node_id,
            backend_job_id,
            "Job rendering",
        );
        self.publish(&job);
        Some(job)
    }

    /// Monotonic progress update for the rendering job owning
    /// `backend_job_id`. Also refreshes the activity timestamp.
    pub fn record_progress(&self, job_id: JobId, backend_job_id: &str, percent: u8) -> Option<RenderJob> {
        let now = Utc::now();
        let percent = percent.min(100);
        let mut advanced = false;
        let job = self.store.update(job_id, &mut |job| {
            if job.status != JobStatus::Rendering
                || job.backend_job_id.as_deref() != Some(backend_job_id)
            {
                return false;
            }
            advanced = percent > job.progress;
            if advanced {
                job.progress = percent;
            }
            job.last_activity_at = Some(now);
            true
        })?;
        if advanced {
            tracing::debug!(job_id = %job.id, progress = job.progress, "Job progress");
            self.publish(&job);
        }
        Some(job)
    }

    // ---------------------------------------------------------------------
    // Terminal transition
    // ---------------------------------------------------------------------

    /// Apply a completion or failure to the attempt identified by `guard`.
    ///
    /// Returns the committed job, or `None` when the attempt is no longer
    /// current. On commit the node is released and its push channel closed.
    pub fn apply_terminal_transition(
        &self,
        job_id: JobId,
        guard: &TerminalGuard,
        outcome: TerminalOutcome,
    ) -> Option<RenderJob> {
        let now = Utc::now();
        let mut decision = None;
        let job = self.store.update(job_id, &mut |job| {
            if !guard.matches(job) {
                return false;
            }
            match &outcome {
                TerminalOutcome::Completed {
                    output_url,
                    thumbnail_url,
                } => {
                    retry::apply_completion(job, output_url.clone(), thumbnail_url.clone(), now);
                    decision = None;
                }
                TerminalOutcome::Failed { message, retryable } => {
                    decision = Some(retry::apply_failure(job, message, *retryable, now));
                }
            }
            true
        });

        let Some(job) = job else {
            tracing::debug!(
                job_id = %job_id,
                node_id = %guard.node_id,
                "Ignoring terminal signal for a superseded attempt",
            );
            return None;
        };

        // Disconnect before release: once released the node may carry a
        // new attempt's channel.
        self.tracker.disconnect(&guard.node_id);
        self.pool.release_job(&guard.node_id, job_id);

        match decision {
            None => tracing::info!(
                job_id = %job.id,
                node_id = %guard.node_id,
                attempts = job.attempts,
                output_url = job.output_url.as_deref().unwrap_or(""),
                "Job completed",
            ),
            Some(RetryDecision::Requeue) => tracing::warn!(
                job_id = %job.id,
                node_id = %guard.node_id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                error = job.error.as_deref().unwrap_or(""),
                "Job attempt failed, re-queued",
            ),
            Some(RetryDecision::Fail) => tracing::error!(
                job_id = %job.id,
                node_id = %guard.node_id,
                attempts = job.attempts,
                error = job.error.as_deref().unwrap_or(""),
                "Job failed",
            ),
        }

        self.publish(&job);
        Some(job)
    }

    pub fn fail(&self, job_id: JobId, guard: &TerminalGuard, err: &DispatchError) -> Option<RenderJob> {
        self.apply_terminal_transition(job_id, guard, TerminalOutcome::from_error(err))
    }

    /// Settle a running job from its history record. `Pending` changes
    /// nothing and returns `None`.
    pub fn settle_from_history(
        &self,
        job_id: JobId,
        guard: &TerminalGuard,
        endpoint: &str,
        outcome: HistoryOutcome,
    ) -> Option<RenderJob> {
        match outcome {
            HistoryOutcome::Pending => None,
            HistoryOutcome::Succeeded { artifacts } => {
                let (output_url, thumbnail_url) = select_output_urls(endpoint, &artifacts);
                self.apply_terminal_transition(
                    job_id,
                    guard,
                    TerminalOutcome::Completed {
                        output_url,
                        thumbnail_url,
                    },
                )
            }
            HistoryOutcome::Failed { message } => {
                self.fail(job_id, guard, &DispatchError::ExecutionError(message))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Node bookkeeping
    // ---------------------------------------------------------------------

    pub fn lock_pairing(&self) -> MutexGuard<'_, ()> {
        self.pairing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the pool sync pass and close push channels no claim accounts for.
    pub fn sync_nodes(&self) -> SyncReport {
        let _pairing = self.lock_pairing();
        let report = self.pool.sync(self.store.as_ref());
        for node_id in &report.released {
            self.tracker.disconnect(node_id);
        }
        for node_id in self.tracker.connected_nodes() {
            if self.pool.current_job(&node_id).is_none() {
                self.tracker.disconnect(&node_id);
            }
        }
        if !report.is_empty() {
            tracing::info!(
                released = report.released.len(),
                forced_available = report.forced_available.len(),
                "Node sync corrected pool state",
            );
        }
        report
    }

    /// Endpoint of `node_id` for the job's capability.
    pub fn endpoint_for(&self, job: &RenderJob, node_id: &str) -> Option<String> {
        self.pool.registry().resolve_endpoint(node_id, job.capability())
    }
}
