//! The scheduler facade.
//!
//! Owns the shared state and the three timer loops (tick, reconciliation
//! poll, node sync). Everything the API layer needs goes through here.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use renderq_core::backend::RenderBackend;
use renderq_core::job::{JobStatus, JobStatusCounts, NewRenderJob, RenderJob};
use renderq_core::node::{NodeRegistry, NodeStatus};
use renderq_core::types::JobId;
use renderq_events::{EventBus, SchedulerEvent};

use crate::config::SchedulerConfig;
use crate::dispatcher::{self, Dispatch};
use crate::error::EngineError;
use crate::pool::{NodePoolManager, SyncReport};
use crate::progress::ProgressTracker;
use crate::reconcile::{self, ReconcileReport};
use crate::store::{InMemoryJobStore, JobStore};
use crate::transition::Shared;

struct LoopHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    loops: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<dyn NodeRegistry>,
        backend: Arc<dyn RenderBackend>,
        events: Arc<EventBus>,
        config: SchedulerConfig,
    ) -> Self {
        let shared = Shared {
            store,
            pool: NodePoolManager::new(registry),
            tracker: ProgressTracker::new(),
            backend,
            events,
            config,
            running: AtomicBool::new(false),
            pairing: Mutex::new(()),
        };
        Self {
            shared: Arc::new(shared),
            loops: Mutex::new(None),
        }
    }

    /// Scheduler over a fresh [`InMemoryJobStore`] and event bus.
    pub fn in_memory(
        registry: Arc<dyn NodeRegistry>,
        backend: Arc<dyn RenderBackend>,
        config: SchedulerConfig,
    ) -> Self {
        Self::new(
            Arc::new(InMemoryJobStore::new()),
            registry,
            backend,
            Arc::new(EventBus::default()),
            config,
        )
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Validate and enqueue one job.
    pub fn submit(&self, new: NewRenderJob) -> Result<JobId, EngineError> {
        new.validate()?;
        Ok(self.enqueue(new))
    }

    /// Enqueue several jobs. Nothing is enqueued unless every job is valid.
    pub fn submit_batch(&self, jobs: Vec<NewRenderJob>) -> Result<Vec<JobId>, EngineError> {
        for new in &jobs {
            new.validate()?;
        }
        Ok(jobs.into_iter().map(|new| self.enqueue(new)).collect())
    }

    fn enqueue(&self, new: NewRenderJob) -> JobId {
        let job = RenderJob::from_new(
            new,
            uuid::Uuid::new_v4(),
            Utc::now(),
            self.shared.config.default_max_attempts,
        );
        let id = job.id;
        tracing::info!(
            job_id = %id,
            target_id = %job.target_id,
            workflow = %job.settings.workflow_kind,
            priority = job.priority,
            "Job queued",
        );
        self.shared.store.insert(job.clone());
        self.shared.publish(&job);
        id
    }

    pub fn get(&self, id: JobId) -> Option<RenderJob> {
        self.shared.store.get(id)
    }

    pub fn list(&self) -> Vec<RenderJob> {
        self.shared.store.list()
    }

    pub fn statuses(&self) -> JobStatusCounts {
        JobStatusCounts::tally(&self.shared.store.list())
    }

    pub fn node_statuses(&self) -> Vec<NodeStatus> {
        self.shared.pool.statuses()
    }

    /// Re-queue a finished job with a clean attempt count.
    pub fn retry(&self, id: JobId) -> Result<RenderJob, EngineError> {
        let mut status = None;
        let job = self.shared.store.update(id, &mut |job| {
            if job.is_active() {
                status = Some(job.status);
                return false;
            }
            job.reset_for_retry();
            true
        });
        match (job, status) {
            (Some(job), _) => {
                tracing::info!(job_id = %id, "Job re-queued by retry");
                self.shared.publish(&job);
                Ok(job)
            }
            (None, Some(status)) => Err(EngineError::InvalidState {
                id,
                status,
                action: "retry",
            }),
            (None, None) => Err(EngineError::JobNotFound(id)),
        }
    }

    /// Delete a job. An active job's node is released and the backend asked
    /// to drop the prompt.
    pub async fn remove(&self, id: JobId) -> Result<RenderJob, EngineError> {
        let job = self
            .shared
            .store
            .remove(id)
            .ok_or(EngineError::JobNotFound(id))?;

        if let Some(node_id) = job.assigned_node.as_deref().filter(|_| job.is_active()) {
            self.shared.tracker.disconnect(node_id);
            self.shared.pool.release_job(node_id, id);
            if let (Some(backend_job_id), Some(endpoint)) = (
                job.backend_job_id.as_deref(),
                self.shared.endpoint_for(&job, node_id),
            ) {
                if let Err(e) = self.shared.backend.cancel(&endpoint, backend_job_id).await {
                    tracing::warn!(
                        job_id = %id,
                        node_id,
                        error = %e,
                        "Backend cancel for removed job failed",
                    );
                }
            }
        }

        tracing::info!(job_id = %id, status = %job.status, "Job removed");
        self.shared.events.publish(SchedulerEvent::JobRemoved { job_id: id });
        Ok(job)
    }

    /// Delete every completed job. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = self
            .shared
            .store
            .retain(&mut |job| job.status != JobStatus::Completed);
        for job in &removed {
            self.shared
                .events
                .publish(SchedulerEvent::JobRemoved { job_id: job.id });
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Cleared completed jobs");
        }
        removed.len()
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Enable auto-run and spawn the loops. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut loops = self.lock_loops();
        if self.shared.set_running(true) {
            return false;
        }

        self.adopt_active_jobs();

        let cancel = CancellationToken::new();
        let config = &self.shared.config;
        let handles = vec![
            spawn_loop("tick", config.tick_interval, cancel.clone(), {
                let shared = Arc::clone(&self.shared);
                move || {
                    dispatcher::tick(&shared);
                    async {}
                }
            }),
            spawn_loop("reconcile", config.reconcile_interval, cancel.clone(), {
                let shared = Arc::clone(&self.shared);
                move || {
                    let shared = Arc::clone(&shared);
                    async move {
                        reconcile::reconcile(&shared).await;
                    }
                }
            }),
            spawn_loop("node_sync", config.node_sync_interval, cancel.clone(), {
                let shared = Arc::clone(&self.shared);
                move || {
                    shared.sync_nodes();
                    async {}
                }
            }),
        ];
        *loops = Some(LoopHandle { cancel, handles });

        tracing::info!("Scheduler started");
        self.shared.events.publish(SchedulerEvent::state_changed(true));
        true
    }

    /// Disable auto-run, stop the loops, close every push channel and clear
    /// the node map. In-flight dispatches finish on their own. Returns
    /// `false` if already stopped.
    pub fn stop(&self) -> bool {
        let loops = self.lock_loops().take();
        let was_running = self.shared.set_running(false);
        if let Some(loops) = loops {
            loops.cancel.cancel();
        }

        let closed = self.shared.tracker.disconnect_all();
        let released = self.shared.pool.clear();

        if was_running {
            tracing::info!(
                closed_channels = closed,
                released_nodes = released.len(),
                "Scheduler stopped",
            );
            self.shared.events.publish(SchedulerEvent::state_changed(false));
        }
        was_running
    }

    /// [`stop`](Self::stop), then wait for the loop tasks to exit.
    pub async fn shutdown(&self) {
        let loops = self.lock_loops().take();
        self.stop();
        if let Some(loops) = loops {
            loops.cancel.cancel();
            for handle in loops.handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Scheduler loop panicked");
                }
            }
        }
    }

    /// Re-claim nodes for jobs left active by a previous run and reopen
    /// their push channels.
    fn adopt_active_jobs(&self) {
        for job in self.shared.store.list_active() {
            let Some(node_id) = job.assigned_node.as_deref() else {
                continue;
            };
            if !self.shared.pool.adopt(node_id, job.id, job.capability()) {
                tracing::warn!(
                    job_id = %job.id,
                    node_id,
                    "Node already claimed by another job, leaving to reconciliation",
                );
                continue;
            }
            if job.backend_job_id.is_none() {
                continue;
            }
            if let (Some(client_id), Some(endpoint)) =
                (job.client_id.as_deref(), self.shared.endpoint_for(&job, node_id))
            {
                self.shared
                    .tracker
                    .connect(&self.shared, node_id, &endpoint, client_id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single passes
    // -----------------------------------------------------------------------

    /// Run one scheduling pass now.
    pub fn tick(&self) -> Vec<Dispatch> {
        dispatcher::tick(&self.shared)
    }

    /// Run one reconciliation poll now.
    pub async fn reconcile(&self) -> ReconcileReport {
        reconcile::reconcile(&self.shared).await
    }

    /// Run one node sync pass now.
    pub fn sync_nodes(&self) -> SyncReport {
        self.shared.sync_nodes()
    }

    /// Nodes with an open push channel.
    pub fn connected_nodes(&self) -> Vec<String> {
        self.shared.tracker.connected_nodes()
    }

    fn lock_loops(&self) -> std::sync::MutexGuard<'_, Option<LoopHandle>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(loops) = self.lock_loops().take() {
            loops.cancel.cancel();
        }
        self.shared.tracker.disconnect_all();
    }
}

/// Run `pass` every `period` until `cancel` fires. The first pass runs one
/// period after start.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            name,
            interval_ms = period.as_millis() as u64,
            "Scheduler loop started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(name, "Scheduler loop shutting down");
                    break;
                }
                _ = ticker.tick() => pass().await,
            }
        }
    })
}
