#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use renderq_api::config::ServerConfig;
use renderq_api::router::build_app_router;
use renderq_api::state::AppState;
use renderq_api::ws::WsManager;
use renderq_core::backend::{
    ArtifactKind, BackendError, BackendEventStream, HistoryOutcome, OutputArtifact, RenderBackend,
};
use renderq_core::node::Capability;
use renderq_engine::{NodeSpec, Scheduler, SchedulerConfig, StaticNodeRegistry};

/// Backend whose submits always succeed. History stays `Pending` until
/// [`StubBackend::finish_all`] is called; push channels never emit.
#[derive(Default)]
pub struct StubBackend {
    submitted: AtomicUsize,
    finished: AtomicBool,
    cancelled: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn finish_all(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RenderBackend for StubBackend {
    async fn submit(
        &self,
        _endpoint: &str,
        _client_id: &str,
        _graph: &Value,
    ) -> Result<String, BackendError> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("prompt-{n}"))
    }

    async fn fetch_history(
        &self,
        _endpoint: &str,
        _backend_job_id: &str,
    ) -> Result<HistoryOutcome, BackendError> {
        if !self.finished.load(Ordering::SeqCst) {
            return Ok(HistoryOutcome::Pending);
        }
        Ok(HistoryOutcome::Succeeded {
            artifacts: vec![OutputArtifact {
                filename: "shot_00001.mp4".into(),
                subfolder: Some("renderq".into()),
                kind: ArtifactKind::Video,
            }],
        })
    }

    async fn subscribe(
        &self,
        _endpoint: &str,
        _client_id: &str,
    ) -> Result<BackendEventStream, BackendError> {
        Ok(futures::stream::pending().boxed())
    }

    async fn cancel(&self, _endpoint: &str, backend_job_id: &str) -> Result<(), BackendError> {
        self.cancelled.lock().unwrap().push(backend_job_id.to_string());
        Ok(())
    }
}

/// Test `ServerConfig` with the dev CORS origin.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

pub fn video_node(id: &str) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        name: format!("Node {id}"),
        endpoint: format!("http://{id}:8188"),
        capabilities: vec![Capability::VideoGeneration],
    }
}

pub struct TestApp {
    pub router: Router,
    pub scheduler: Arc<Scheduler>,
    pub backend: Arc<StubBackend>,
}

impl TestApp {
    /// Start the scheduler, dispatch every queued job that fits, and wait
    /// for the submits to land.
    pub async fn dispatch(&self) -> usize {
        self.scheduler.start();
        let dispatches = self.scheduler.tick();
        let n = dispatches.len();
        for d in dispatches {
            d.wait().await;
        }
        n
    }

    /// Mark every submitted job finished and run one reconciliation pass.
    pub async fn complete_all(&self) {
        self.backend.finish_all();
        self.scheduler.reconcile().await;
    }
}

/// Build the production router over an in-memory scheduler with `nodes`.
///
/// Loops are effectively disabled; tests drive ticks by hand.
pub fn build_test_app(nodes: Vec<NodeSpec>) -> TestApp {
    let config = test_config();
    let backend = Arc::new(StubBackend::default());
    let scheduler_config = SchedulerConfig {
        tick_interval: Duration::from_secs(3600),
        reconcile_interval: Duration::from_secs(3600),
        node_sync_interval: Duration::from_secs(3600),
        auto_start: false,
        ..SchedulerConfig::default()
    };
    let scheduler = Arc::new(Scheduler::in_memory(
        Arc::new(StaticNodeRegistry::new(nodes)),
        backend.clone(),
        scheduler_config,
    ));

    let state = AppState {
        scheduler: Arc::clone(&scheduler),
        config: Arc::new(config.clone()),
        ws_manager: Arc::new(WsManager::new()),
    };
    let router = build_app_router(state, &config).unwrap();

    TestApp {
        router,
        scheduler,
        backend,
    }
}

/// A valid job submission body.
pub fn job_body(priority: i32) -> Value {
    json!({
        "source_ref": "story-1",
        "target_id": format!("shot-{priority}"),
        "target_number": 1,
        "title": "Opening shot",
        "positive_prompt": "a lighthouse at dusk",
        "negative_prompt": "blurry",
        "settings": {
            "workflow_kind": "wan_t2v",
            "frame_count": 81,
            "fps": 16,
            "resolution": "832x480"
        },
        "priority": priority
    })
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
