#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use renderq_core::backend::{
    ArtifactKind, BackendError, BackendEvent, BackendEventStream, HistoryOutcome, OutputArtifact,
    RenderBackend,
};
use renderq_core::job::{NewRenderJob, RenderSettings};
use renderq_core::node::Capability;
use renderq_engine::{NodeSpec, Scheduler, SchedulerConfig, StaticNodeRegistry};

/// One accepted `submit` call.
#[derive(Debug, Clone)]
pub struct Submission {
    pub endpoint: String,
    pub client_id: String,
    pub backend_job_id: String,
    pub graph: Value,
}

#[derive(Default)]
struct MockState {
    submit_failures: VecDeque<BackendError>,
    submissions: Vec<Submission>,
    history: HashMap<String, HistoryOutcome>,
    channels: HashMap<String, mpsc::UnboundedSender<BackendEvent>>,
    cancelled: Vec<String>,
}

/// Scripted [`RenderBackend`]. Submits succeed unless a failure is queued;
/// history is `Pending` unless set; push channels are fed by [`MockBackend::push`].
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `errors.len()` submits fail with these errors, in order.
    pub fn fail_next_submits(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.state.lock().unwrap().submit_failures.extend(errors);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn set_history(&self, backend_job_id: &str, outcome: HistoryOutcome) {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(backend_job_id.to_string(), outcome);
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn has_subscriber(&self, client_id: &str) -> bool {
        self.state.lock().unwrap().channels.contains_key(client_id)
    }

    /// Send a push event to the channel opened with `client_id`.
    pub fn push(&self, client_id: &str, event: BackendEvent) -> bool {
        let state = self.state.lock().unwrap();
        state
            .channels
            .get(client_id)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Drop the sending side of a channel, ending the subscriber's stream.
    pub fn close_channel(&self, client_id: &str) {
        self.state.lock().unwrap().channels.remove(client_id);
    }

    pub async fn wait_for_subscriber(&self, client_id: &str) {
        for _ in 0..200 {
            if self.has_subscriber(client_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no subscriber for {client_id}");
    }
}

#[async_trait::async_trait]
impl RenderBackend for MockBackend {
    async fn submit(
        &self,
        endpoint: &str,
        client_id: &str,
        graph: &Value,
    ) -> Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        let backend_job_id = format!("prompt-{}", state.submissions.len() + 1);
        state.submissions.push(Submission {
            endpoint: endpoint.to_string(),
            client_id: client_id.to_string(),
            backend_job_id: backend_job_id.clone(),
            graph: graph.clone(),
        });
        Ok(backend_job_id)
    }

    async fn fetch_history(
        &self,
        _endpoint: &str,
        backend_job_id: &str,
    ) -> Result<HistoryOutcome, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .history
            .get(backend_job_id)
            .cloned()
            .unwrap_or(HistoryOutcome::Pending))
    }

    async fn subscribe(
        &self,
        _endpoint: &str,
        client_id: &str,
    ) -> Result<BackendEventStream, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(client_id.to_string(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn cancel(&self, _endpoint: &str, backend_job_id: &str) -> Result<(), BackendError> {
        self.state
            .lock()
            .unwrap()
            .cancelled
            .push(backend_job_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn video_node(id: &str) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        name: id.to_string(),
        endpoint: format!("http://{id}:8188"),
        capabilities: vec![Capability::VideoGeneration],
    }
}

/// Loops are effectively disabled; tests drive passes by hand.
pub fn manual_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_secs(3600),
        reconcile_interval: Duration::from_secs(3600),
        node_sync_interval: Duration::from_secs(3600),
        auto_start: false,
        ..SchedulerConfig::default()
    }
}

pub fn scheduler(nodes: Vec<NodeSpec>, backend: Arc<MockBackend>) -> Scheduler {
    scheduler_with(nodes, backend, manual_config())
}

pub fn scheduler_with(
    nodes: Vec<NodeSpec>,
    backend: Arc<MockBackend>,
    config: SchedulerConfig,
) -> Scheduler {
    Scheduler::in_memory(Arc::new(StaticNodeRegistry::new(nodes)), backend, config)
}

pub fn new_job(priority: i32) -> NewRenderJob {
    NewRenderJob {
        source_ref: "story-1".into(),
        target_id: format!("shot-p{priority}"),
        target_number: 1,
        title: format!("Priority {priority}"),
        positive_prompt: "a lighthouse at dusk".into(),
        negative_prompt: "blurry".into(),
        settings: RenderSettings::default(),
        asset_overrides: Default::default(),
        priority: Some(priority),
        max_attempts: None,
    }
}

pub fn video_output(name: &str) -> HistoryOutcome {
    HistoryOutcome::Succeeded {
        artifacts: vec![
            OutputArtifact {
                filename: name.to_string(),
                subfolder: Some("renderq".into()),
                kind: ArtifactKind::Video,
            },
            OutputArtifact {
                filename: "thumb.png".into(),
                subfolder: Some("renderq".into()),
                kind: ArtifactKind::Image,
            },
        ],
    }
}

/// Run one tick and wait for every dispatch it spawned.
pub async fn tick_and_wait(scheduler: &Scheduler) -> usize {
    let dispatches = scheduler.tick();
    let n = dispatches.len();
    for d in dispatches {
        d.wait().await;
    }
    n
}

/// Poll `check` until it holds, failing the test after about a second.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
