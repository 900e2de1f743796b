//! Render backend seam: dispatch, history polling and push events.
//!
//! The engine talks to compute nodes only through [`RenderBackend`]. The
//! ComfyUI implementation lives in `renderq-comfyui`; tests plug in
//! scripted fakes.

use futures::stream::BoxStream;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

/// A typed event received over a node's push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BackendEvent {
    /// The node started executing a prompt.
    Started { backend_job_id: String },

    /// Step-level progress. Some backends omit the prompt id, in which case
    /// the event belongs to whatever job the node is currently running.
    Progress {
        backend_job_id: Option<String>,
        value: u32,
        max: u32,
    },

    /// The whole prompt finished executing.
    Finished { backend_job_id: String },

    /// Execution failed on the node.
    ExecutionError {
        backend_job_id: String,
        message: String,
    },
}

impl BackendEvent {
    pub fn backend_job_id(&self) -> Option<&str> {
        match self {
            BackendEvent::Started { backend_job_id }
            | BackendEvent::Finished { backend_job_id }
            | BackendEvent::ExecutionError { backend_job_id, .. } => Some(backend_job_id),
            BackendEvent::Progress { backend_job_id, .. } => backend_job_id.as_deref(),
        }
    }
}

/// Stream of push events for one client connection. Ends when the
/// connection drops.
pub type BackendEventStream = BoxStream<'static, BackendEvent>;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Kind of file a node produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Video,
    Image,
}

/// One named output file in a node's history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputArtifact {
    pub filename: String,
    pub subfolder: Option<String>,
    pub kind: ArtifactKind,
}

/// Result of reading a backend job's history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// No history yet; the job is still queued or running.
    Pending,
    /// Finished successfully with these artifacts (possibly none).
    Succeeded { artifacts: Vec<OutputArtifact> },
    /// The node recorded an execution error.
    Failed { message: String },
}

/// Build a download URL for an artifact on `endpoint`.
///
/// `{endpoint}/view?filename=<f>&subfolder=<s>&type=output`, query values
/// form-encoded.
pub fn artifact_url(endpoint: &str, artifact: &OutputArtifact) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("filename", &artifact.filename)
        .append_pair("subfolder", artifact.subfolder.as_deref().unwrap_or(""))
        .append_pair("type", "output")
        .finish();
    format!("{}/view?{query}", endpoint.trim_end_matches('/'))
}

/// Pick the output and thumbnail URLs from a history listing.
///
/// The first video artifact is the output and the first still image the
/// thumbnail. Image-only workflows use their first image for both.
pub fn select_output_urls(
    endpoint: &str,
    artifacts: &[OutputArtifact],
) -> (Option<String>, Option<String>) {
    let first_of = |kind: ArtifactKind| artifacts.iter().find(|a| a.kind == kind);
    let image = first_of(ArtifactKind::Image).map(|a| artifact_url(endpoint, a));
    match first_of(ArtifactKind::Video) {
        Some(video) => (Some(artifact_url(endpoint, video)), image),
        None => (image.clone(), image),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`RenderBackend`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Could not reach the node (connect, DNS, TLS, timeout).
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// The node answered but refused the request.
    #[error("Backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The node answered with something we could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// RenderBackend
// ---------------------------------------------------------------------------

/// Transport to a compute node.
#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    /// Queue `graph` on the node. Returns the node-assigned backend job id.
    async fn submit(
        &self,
        endpoint: &str,
        client_id: &str,
        graph: &serde_json::Value,
    ) -> Result<String, BackendError>;

    /// Read the node's history entry for `backend_job_id`.
    async fn fetch_history(
        &self,
        endpoint: &str,
        backend_job_id: &str,
    ) -> Result<HistoryOutcome, BackendError>;

    /// Open the push channel scoped by `client_id`.
    async fn subscribe(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<BackendEventStream, BackendError>;

    /// Best-effort removal of a queued or running backend job.
    async fn cancel(&self, _endpoint: &str, _backend_job_id: &str) -> Result<(), BackendError> {
        Ok(())
    }
}
