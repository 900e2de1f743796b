//! [`RenderBackend`] implementation over ComfyUI's REST and WebSocket APIs.

use futures::{future, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use renderq_core::backend::{
    BackendError, BackendEvent, BackendEventStream, HistoryOutcome, RenderBackend,
};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::history::parse_history;
use crate::messages::{parse_message, ComfyUIMessage};

/// Dispatches to any ComfyUI node by endpoint. One shared HTTP pool.
#[derive(Clone, Default)]
pub struct ComfyUIBackend {
    http: reqwest::Client,
}

impl ComfyUIBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn api(&self, endpoint: &str) -> ComfyUIApi {
        ComfyUIApi::with_client(self.http.clone(), endpoint)
    }
}

impl From<ComfyUIApiError> for BackendError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) if e.is_decode() => BackendError::Protocol(e.to_string()),
            ComfyUIApiError::Request(e) => BackendError::Unreachable(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => BackendError::Rejected { status, body },
        }
    }
}

impl From<ComfyUIClientError> for BackendError {
    fn from(err: ComfyUIClientError) -> Self {
        match err {
            ComfyUIClientError::Connection(msg) => BackendError::Unreachable(msg),
        }
    }
}

#[async_trait::async_trait]
impl RenderBackend for ComfyUIBackend {
    async fn submit(
        &self,
        endpoint: &str,
        client_id: &str,
        graph: &serde_json::Value,
    ) -> Result<String, BackendError> {
        let response = self.api(endpoint).submit_workflow(graph, client_id).await?;
        if response
            .node_errors
            .as_object()
            .is_some_and(|errors| !errors.is_empty())
        {
            return Err(BackendError::Rejected {
                status: 400,
                body: response.node_errors.to_string(),
            });
        }
        tracing::debug!(
            endpoint,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow queued on ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn fetch_history(
        &self,
        endpoint: &str,
        backend_job_id: &str,
    ) -> Result<HistoryOutcome, BackendError> {
        let history = self.api(endpoint).get_history(backend_job_id).await?;
        Ok(parse_history(backend_job_id, &history))
    }

    async fn subscribe(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<BackendEventStream, BackendError> {
        let conn = ComfyUIClient::new(endpoint).connect(client_id).await?;
        let endpoint = endpoint.to_string();

        let events = conn
            .ws_stream
            .take_while(|frame| future::ready(matches!(frame, Ok(msg) if !msg.is_close())))
            .filter_map(move |frame| {
                let event = frame.ok().and_then(|msg| translate_frame(&endpoint, msg));
                future::ready(event)
            })
            .boxed();
        Ok(events)
    }

    /// Deletes the prompt from the queue, then interrupts the node in case
    /// it is already executing. The node only ever runs one of our prompts.
    async fn cancel(&self, endpoint: &str, backend_job_id: &str) -> Result<(), BackendError> {
        let api = self.api(endpoint);
        api.cancel_execution(backend_job_id).await?;
        api.interrupt().await?;
        Ok(())
    }
}

fn translate_frame(endpoint: &str, frame: Message) -> Option<BackendEvent> {
    let Message::Text(text) = frame else {
        // Binary frames carry preview images.
        return None;
    };
    match parse_message(&text) {
        Ok(msg) => to_backend_event(endpoint, msg),
        Err(e) => {
            tracing::trace!(endpoint, error = %e, "Ignoring unrecognised ComfyUI message");
            None
        }
    }
}

/// Map a ComfyUI message onto the scheduler's event vocabulary.
pub fn to_backend_event(endpoint: &str, msg: ComfyUIMessage) -> Option<BackendEvent> {
    match msg {
        ComfyUIMessage::ExecutionStart(data) => Some(BackendEvent::Started {
            backend_job_id: data.prompt_id,
        }),
        ComfyUIMessage::Progress(data) => Some(BackendEvent::Progress {
            value: data.value.max(0) as u32,
            max: data.max.max(0) as u32,
            backend_job_id: data.prompt_id,
        }),
        ComfyUIMessage::Executing(data) => match (data.node, data.prompt_id) {
            (None, Some(prompt_id)) => Some(BackendEvent::Finished {
                backend_job_id: prompt_id,
            }),
            _ => None,
        },
        ComfyUIMessage::ExecutionError(data) => Some(BackendEvent::ExecutionError {
            message: data.message(),
            backend_job_id: data.prompt_id,
        }),
        ComfyUIMessage::ExecutionInterrupted(data) => Some(BackendEvent::ExecutionError {
            backend_job_id: data.prompt_id,
            message: "Execution interrupted".to_string(),
        }),
        ComfyUIMessage::ExecutionSuccess(data) => {
            // `executing` with a null node follows and drives completion.
            tracing::debug!(endpoint, prompt_id = %data.prompt_id, "ComfyUI reported success");
            None
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::trace!(endpoint, cached_nodes = data.nodes.len(), "Execution used cache");
            None
        }
        ComfyUIMessage::Executed(data) => {
            tracing::trace!(endpoint, node = %data.node, "Node produced output");
            None
        }
        ComfyUIMessage::Status(data) => {
            tracing::trace!(
                endpoint,
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn event(json: &str) -> Option<BackendEvent> {
        to_backend_event("http://n", parse_message(json).unwrap())
    }

    #[test]
    fn finished_only_when_node_is_null() {
        assert_eq!(
            event(r#"{"type":"executing","data":{"node":null,"prompt_id":"p"}}"#),
            Some(BackendEvent::Finished { backend_job_id: "p".into() })
        );
        assert_eq!(event(r#"{"type":"executing","data":{"node":"8","prompt_id":"p"}}"#), None);
    }

    #[test]
    fn progress_keeps_optional_prompt_id() {
        assert_eq!(
            event(r#"{"type":"progress","data":{"value":3,"max":12}}"#),
            Some(BackendEvent::Progress { backend_job_id: None, value: 3, max: 12 })
        );
    }

    #[test]
    fn errors_and_interrupts_become_execution_errors() {
        assert_matches!(
            event(r#"{"type":"execution_error","data":{"prompt_id":"p","exception_message":"OOM","exception_type":"RuntimeError"}}"#),
            Some(BackendEvent::ExecutionError { message, .. }) if message == "RuntimeError: OOM"
        );
        assert_matches!(
            event(r#"{"type":"execution_interrupted","data":{"prompt_id":"p"}}"#),
            Some(BackendEvent::ExecutionError { backend_job_id, .. }) if backend_job_id == "p"
        );
    }

    #[test]
    fn informational_messages_are_dropped() {
        assert_eq!(event(r#"{"type":"execution_success","data":{"prompt_id":"p"}}"#), None);
        assert_eq!(
            event(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":0}}}}"#),
            None
        );
    }

    #[test]
    fn binary_and_unknown_frames_are_ignored() {
        assert_eq!(translate_frame("http://n", Message::Binary(vec![1, 2, 3].into())), None);
        assert_eq!(
            translate_frame("http://n", Message::Text(r#"{"type":"nope","data":{}}"#.into())),
            None
        );
    }

    #[test]
    fn api_errors_map_to_backend_errors() {
        let err: BackendError = ComfyUIApiError::ApiError {
            status: 400,
            body: "invalid prompt".into(),
        }
        .into();
        assert_matches!(err, BackendError::Rejected { status: 400, .. });

        let err: BackendError = ComfyUIClientError::Connection("refused".into()).into();
        assert_matches!(err, BackendError::Unreachable(_));
    }

    #[tokio::test]
    async fn submit_to_unreachable_node_is_unreachable() {
        let backend = ComfyUIBackend::new();
        let err = backend
            .submit("http://127.0.0.1:1", "c", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_matches!(err, BackendError::Unreachable(_));
    }
}
