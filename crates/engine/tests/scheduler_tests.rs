mod common;

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;

use renderq_core::backend::{BackendError, HistoryOutcome};
use renderq_core::job::{JobStatus, RenderJob};
use renderq_core::node::{Capability, NodeRegistry};
use renderq_core::types::JobId;
use renderq_engine::{
    EngineError, InMemoryJobStore, JobStore, Scheduler, StaticNodeRegistry,
};
use renderq_events::{EventBus, SchedulerEvent};
use tokio::sync::oneshot;

use common::*;

fn unreachable() -> BackendError {
    BackendError::Unreachable("connection refused".into())
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assigns_by_priority_when_nodes_are_scarce() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1"), video_node("n2")], backend.clone());
    let low = scheduler.submit(new_job(2)).unwrap();
    let urgent = scheduler.submit(new_job(0)).unwrap();
    let normal = scheduler.submit(new_job(1)).unwrap();

    scheduler.start();
    assert_eq!(tick_and_wait(&scheduler).await, 2);

    assert_eq!(scheduler.get(urgent).unwrap().status, JobStatus::Rendering);
    assert_eq!(scheduler.get(normal).unwrap().status, JobStatus::Rendering);
    assert_eq!(scheduler.get(low).unwrap().status, JobStatus::Queued);

    let busy: Vec<_> = scheduler
        .node_statuses()
        .into_iter()
        .filter(|n| n.busy)
        .collect();
    assert_eq!(busy.len(), 2);
    assert_ne!(busy[0].current_job, busy[1].current_job);

    // No free node: nothing more to dispatch.
    assert_eq!(tick_and_wait(&scheduler).await, 0);
    assert_eq!(backend.submissions().len(), 2);
}

#[tokio::test]
async fn equal_priority_dispatches_oldest_first() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let first = scheduler.submit(new_job(5)).unwrap();
    let second = scheduler.submit(new_job(5)).unwrap();

    scheduler.start();
    tick_and_wait(&scheduler).await;

    assert!(scheduler.get(first).unwrap().is_active());
    assert_eq!(scheduler.get(second).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn tick_is_noop_while_stopped() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    scheduler.submit(new_job(0)).unwrap();

    assert!(!scheduler.is_running());
    assert_eq!(tick_and_wait(&scheduler).await, 0);
    assert!(backend.submissions().is_empty());
}

#[tokio::test]
async fn jobs_only_go_to_nodes_with_their_capability() {
    let backend = MockBackend::new();
    let mut image_node = video_node("img");
    image_node.capabilities = vec![Capability::ImageGeneration];
    let scheduler = scheduler(vec![image_node], backend.clone());
    let video = scheduler.submit(new_job(0)).unwrap();

    scheduler.start();
    assert_eq!(tick_and_wait(&scheduler).await, 0);
    assert_eq!(scheduler.get(video).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn dispatched_graph_carries_job_settings() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let id = scheduler.submit(new_job(0)).unwrap();

    scheduler.start();
    tick_and_wait(&scheduler).await;

    let submission = &backend.submissions()[0];
    assert_eq!(submission.endpoint, "http://n1:8188");
    assert_eq!(submission.graph["7"]["inputs"]["width"], 832);
    assert_eq!(submission.graph["7"]["inputs"]["height"], 480);
    assert_eq!(submission.graph["7"]["inputs"]["length"], 81);
    assert_eq!(submission.graph["10"]["inputs"]["frame_rate"], 16);

    let job = scheduler.get(id).unwrap();
    assert_eq!(job.backend_job_id.as_deref(), Some(submission.backend_job_id.as_str()));
    assert_eq!(job.client_id.as_deref(), Some(submission.client_id.as_str()));
    assert_eq!(job.assigned_node.as_deref(), Some("n1"));
    assert!(job.started_at.is_some());
    assert_eq!(job.attempts, 1);
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn succeeds_on_third_attempt_after_two_dispatch_failures() {
    let backend = MockBackend::new();
    backend.fail_next_submits([unreachable(), unreachable()]);
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let id = scheduler.submit(new_job(0)).unwrap();
    scheduler.start();

    tick_and_wait(&scheduler).await;
    let job = scheduler.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 1);
    assert!(job.error.as_deref().unwrap().contains("connection refused"));
    assert!(job.assigned_node.is_none());

    tick_and_wait(&scheduler).await;
    assert_eq!(scheduler.get(id).unwrap().attempts, 2);

    tick_and_wait(&scheduler).await;
    let job = scheduler.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Rendering);

    backend.set_history(job.backend_job_id.as_deref().unwrap(), video_output("shot.mp4"));
    let report = scheduler.reconcile().await;
    assert_eq!(report.completed, 1);

    let job = scheduler.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn exhausted_attempts_fail_exactly_once() {
    let backend = MockBackend::new();
    backend.fail_next_submits([unreachable(), unreachable(), unreachable()]);
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let mut new = new_job(0);
    new.max_attempts = Some(2);
    let id = scheduler.submit(new).unwrap();
    let mut events = scheduler.subscribe();
    scheduler.start();

    tick_and_wait(&scheduler).await;
    tick_and_wait(&scheduler).await;
    assert_eq!(tick_and_wait(&scheduler).await, 0);

    let job = scheduler.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert!(job.completed_at.is_some());
    assert!(job.error.is_some());

    let mut failed_events = 0;
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::JobChanged { job } = event {
            if job.status == JobStatus::Failed {
                failed_events += 1;
            }
        }
    }
    assert_eq!(failed_events, 1);
    assert!(scheduler.node_statuses().iter().all(|n| !n.busy));
}

#[tokio::test]
async fn invalid_settings_fail_without_retry() {
    let store = Arc::new(InMemoryJobStore::new());
    let backend = MockBackend::new();
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(StaticNodeRegistry::new(vec![video_node("n1")])),
        backend.clone(),
        Arc::new(EventBus::default()),
        manual_config(),
    );

    // Bypasses submit-time validation.
    let mut new = new_job(0);
    new.settings.resolution = "wide".into();
    let job = RenderJob::from_new(new, uuid::Uuid::new_v4(), Utc::now(), 3);
    let id = job.id;
    store.insert(job);

    scheduler.start();
    tick_and_wait(&scheduler).await;

    let job = scheduler.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(backend.submissions().is_empty());
}

#[tokio::test]
async fn duplicate_completion_is_ignored() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let id = scheduler.submit(new_job(0)).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;

    let backend_job_id = scheduler.get(id).unwrap().backend_job_id.unwrap();
    backend.set_history(&backend_job_id, video_output("first.mp4"));
    assert_eq!(scheduler.reconcile().await.completed, 1);
    let first = scheduler.get(id).unwrap();

    backend.set_history(&backend_job_id, video_output("second.mp4"));
    let report = scheduler.reconcile().await;
    assert_eq!(report.completed, 0);

    let again = scheduler.get(id).unwrap();
    assert_eq!(again.completed_at, first.completed_at);
    assert_eq!(again.output_url, first.output_url);
    assert!(again.output_url.unwrap().contains("first.mp4"));
}

#[tokio::test]
async fn history_error_requeues_through_policy() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let id = scheduler.submit(new_job(0)).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;

    let backend_job_id = scheduler.get(id).unwrap().backend_job_id.unwrap();
    backend.set_history(
        &backend_job_id,
        HistoryOutcome::Failed { message: "CUDA out of memory".into() },
    );
    assert_eq!(scheduler.reconcile().await.failed, 1);

    let job = scheduler.get(id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.backend_job_id.is_none());
    assert!(job.client_id.is_none());
    assert_eq!(job.error.as_deref(), Some("Execution error: CUDA out of memory"));
    assert!(scheduler.node_statuses().iter().all(|n| !n.busy));
}

// ---------------------------------------------------------------------------
// Facade operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_batch_is_all_or_nothing() {
    let scheduler = scheduler(vec![], MockBackend::new());
    let mut bad = new_job(1);
    bad.positive_prompt = "  ".into();

    let err = scheduler.submit_batch(vec![new_job(0), bad]).unwrap_err();
    assert_matches!(err, EngineError::Core(_));
    assert_eq!(scheduler.statuses().total, 0);

    let ids = scheduler.submit_batch(vec![new_job(0), new_job(1)]).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(scheduler.statuses().queued, 2);
}

#[tokio::test]
async fn statuses_count_by_bucket() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    scheduler.submit(new_job(0)).unwrap();
    scheduler.submit(new_job(1)).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;

    let counts = scheduler.statuses();
    assert_eq!(counts.queued, 1);
    assert_eq!(counts.active, 1);
    assert_eq!(counts.completed, 0);
    assert_eq!(counts.total, 2);
}

#[tokio::test]
async fn remove_active_job_frees_node_and_cancels_backend() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let id = scheduler.submit(new_job(0)).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;
    let backend_job_id = scheduler.get(id).unwrap().backend_job_id.unwrap();
    let mut events = scheduler.subscribe();

    let removed = scheduler.remove(id).await.unwrap();
    assert_eq!(removed.id, id);
    assert!(scheduler.get(id).is_none());
    assert_eq!(backend.cancelled(), vec![backend_job_id]);
    assert!(scheduler.node_statuses().iter().all(|n| !n.busy));
    assert!(scheduler.connected_nodes().is_empty());
    assert_matches!(events.try_recv(), Ok(SchedulerEvent::JobRemoved { job_id }) if job_id == id);
}

#[tokio::test]
async fn remove_unknown_job_is_not_found() {
    let scheduler = scheduler(vec![], MockBackend::new());
    let id = uuid::Uuid::new_v4();
    assert_matches!(scheduler.remove(id).await, Err(EngineError::JobNotFound(missing)) if missing == id);
}

#[tokio::test]
async fn clear_completed_keeps_other_jobs() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let done = scheduler.submit(new_job(0)).unwrap();
    let waiting = scheduler.submit(new_job(1)).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;
    let backend_job_id = scheduler.get(done).unwrap().backend_job_id.unwrap();
    backend.set_history(&backend_job_id, video_output("a.mp4"));
    scheduler.reconcile().await;

    assert_eq!(scheduler.clear_completed(), 1);
    assert!(scheduler.get(done).is_none());
    assert!(scheduler.get(waiting).is_some());
    assert_eq!(scheduler.clear_completed(), 0);
}

#[tokio::test]
async fn retry_resets_failed_job_and_rejects_active_one() {
    let backend = MockBackend::new();
    backend.fail_next_submits([unreachable()]);
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let mut new = new_job(0);
    new.max_attempts = Some(1);
    let id = scheduler.submit(new).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;
    assert_eq!(scheduler.get(id).unwrap().status, JobStatus::Failed);

    let job = scheduler.retry(id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);
    assert!(job.error.is_none());
    assert!(job.completed_at.is_none());

    tick_and_wait(&scheduler).await;
    assert_matches!(
        scheduler.retry(id),
        Err(EngineError::InvalidState { status: JobStatus::Rendering, .. })
    );
    assert_matches!(
        scheduler.retry(uuid::Uuid::new_v4()),
        Err(EngineError::JobNotFound(_))
    );
}

// ---------------------------------------------------------------------------
// Run control and node sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_clears_nodes_and_start_readopts_active_jobs() {
    let backend = MockBackend::new();
    let scheduler = scheduler(vec![video_node("n1")], backend.clone());
    let first = scheduler.submit(new_job(0)).unwrap();
    assert!(scheduler.start());
    assert!(!scheduler.start());
    tick_and_wait(&scheduler).await;
    assert_eq!(scheduler.connected_nodes(), vec!["n1".to_string()]);

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    assert!(scheduler.connected_nodes().is_empty());
    assert!(scheduler.node_statuses().iter().all(|n| !n.busy));
    // The job itself is untouched.
    assert_eq!(scheduler.get(first).unwrap().status, JobStatus::Rendering);

    let second = scheduler.submit(new_job(1)).unwrap();
    assert_eq!(tick_and_wait(&scheduler).await, 0);

    assert!(scheduler.start());
    let statuses = scheduler.node_statuses();
    assert_eq!(statuses[0].current_job, Some(first));
    assert_eq!(scheduler.connected_nodes(), vec!["n1".to_string()]);

    // n1 is still running the first job.
    assert_eq!(tick_and_wait(&scheduler).await, 0);
    assert_eq!(scheduler.get(second).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn start_and_stop_publish_state_events() {
    let scheduler = scheduler(vec![], MockBackend::new());
    let mut events = scheduler.subscribe();

    scheduler.start();
    scheduler.shutdown().await;

    assert_matches!(events.try_recv(), Ok(SchedulerEvent::SchedulerStateChanged { running: true, .. }));
    assert_matches!(events.try_recv(), Ok(SchedulerEvent::SchedulerStateChanged { running: false, .. }));
}

#[tokio::test]
async fn sync_releases_stale_claims_and_clears_orphan_busy_flags() {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(StaticNodeRegistry::new(vec![video_node("n1"), video_node("n2")]));
    let backend = MockBackend::new();
    let scheduler = Scheduler::new(
        store.clone(),
        registry.clone(),
        backend.clone(),
        Arc::new(EventBus::default()),
        manual_config(),
    );
    let id = scheduler.submit(new_job(0)).unwrap();
    scheduler.start();
    tick_and_wait(&scheduler).await;
    let node = scheduler.get(id).unwrap().assigned_node.unwrap();

    // The job leaves the active set behind the scheduler's back.
    store.update(id, &mut |job| {
        job.status = JobStatus::Failed;
        true
    });
    let other = if node == "n1" { "n2" } else { "n1" };
    registry.mark_busy(other, Capability::VideoGeneration);

    let report = scheduler.sync_nodes();
    assert_eq!(report.released, vec![node.clone()]);
    assert_eq!(
        report.forced_available,
        vec![(other.to_string(), Capability::VideoGeneration)]
    );
    assert!(!registry.is_busy(&node, Capability::VideoGeneration));
    assert!(!registry.is_busy(other, Capability::VideoGeneration));
    assert!(scheduler.connected_nodes().is_empty());

    // Nothing left to correct.
    assert!(scheduler.sync_nodes().is_empty());
    assert_eq!(store.list().len(), 1);
}

/// Store whose next `update` parks until the test lets it through.
#[derive(Default)]
struct GatedStore {
    inner: InMemoryJobStore,
    gate: Mutex<Option<(oneshot::Sender<()>, mpsc::Receiver<()>)>>,
}

impl GatedStore {
    /// Returns a receiver that fires once an update is parked, and the
    /// sender that releases it.
    fn arm(&self) -> (oneshot::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl JobStore for GatedStore {
    fn insert(&self, job: RenderJob) {
        self.inner.insert(job);
    }

    fn get(&self, id: JobId) -> Option<RenderJob> {
        self.inner.get(id)
    }

    fn list(&self) -> Vec<RenderJob> {
        self.inner.list()
    }

    fn remove(&self, id: JobId) -> Option<RenderJob> {
        self.inner.remove(id)
    }

    fn retain(&self, keep: &mut dyn FnMut(&RenderJob) -> bool) -> Vec<RenderJob> {
        self.inner.retain(keep)
    }

    fn update(&self, id: JobId, apply: &mut dyn FnMut(&mut RenderJob) -> bool) -> Option<RenderJob> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(2));
        }
        self.inner.update(id, apply)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_during_pairing_keeps_the_fresh_claim() {
    let store = Arc::new(GatedStore::default());
    let backend = MockBackend::new();
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        Arc::new(StaticNodeRegistry::new(vec![video_node("a")])),
        backend.clone(),
        Arc::new(EventBus::default()),
        manual_config(),
    ));
    let first = scheduler.submit(new_job(0)).unwrap();
    scheduler.start();

    // The tick claims node a, then parks before the job is assigned.
    let (entered, release) = store.arm();
    let tick = tokio::task::spawn_blocking({
        let scheduler = Arc::clone(&scheduler);
        move || scheduler.tick()
    });
    entered.await.unwrap();

    let sync = tokio::task::spawn_blocking({
        let scheduler = Arc::clone(&scheduler);
        move || scheduler.sync_nodes()
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sync.is_finished(), "sync must wait for the pairing pass");

    release.send(()).unwrap();
    let dispatches = tick.await.unwrap();
    assert_eq!(dispatches.len(), 1);
    for d in dispatches {
        d.wait().await;
    }
    let report = sync.await.unwrap();
    assert!(report.released.is_empty());

    // Node a still belongs to the first job, so a second one waits.
    let second = scheduler.submit(new_job(0)).unwrap();
    assert_eq!(tick_and_wait(&scheduler).await, 0);

    let active = store.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first);
    assert_eq!(active[0].assigned_node.as_deref(), Some("a"));
    assert_eq!(scheduler.get(second).unwrap().status, JobStatus::Queued);
    let status = scheduler.node_statuses().remove(0);
    assert_eq!(status.current_job, Some(first));
}
