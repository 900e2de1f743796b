//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, queue deletion, interruption and history
//! retrieval using [`reqwest`].

use serde::Deserialize;

/// REST client bound to one ComfyUI node.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by `POST /prompt` after queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Prompt id assigned by the node. Later history and push messages use it.
    pub prompt_id: String,
    /// Queue position at the time of submission.
    #[serde(default)]
    pub number: i32,
    /// Per-node validation errors. ComfyUI reports these with a 400, but
    /// some builds return them alongside a 200.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Failures of a single REST call.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure or an undecodable body.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The node answered with a non-2xx status.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl ComfyUIApi {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] so every node shares one
    /// connection pool.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let mut api_url = api_url.into();
        while api_url.ends_with('/') {
            api_url.pop();
        }
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `POST /prompt` with the graph and the client id that scopes push
    /// messages for this prompt.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let request = self.client.post(self.url("prompt")).json(&serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        }));
        let response = send(request).await?;
        Ok(response.json().await?)
    }

    /// `POST /queue` deleting `prompt_id` if it has not started yet.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let request = self
            .client
            .post(self.url("queue"))
            .json(&serde_json::json!({ "delete": [prompt_id] }));
        send(request).await.map(drop)
    }

    /// `POST /interrupt`: stops whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        send(self.client.post(self.url("interrupt"))).await.map(drop)
    }

    /// `GET /history/{prompt_id}`. An empty object means no record yet.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = send(self.client.get(self.url(&format!("history/{prompt_id}")))).await?;
        Ok(response.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }
}

/// Send `request`, turning a non-2xx reply into [`ComfyUIApiError::ApiError`]
/// carrying the body text.
async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ComfyUIApiError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => text,
        Err(_) => String::from("<unreadable body>"),
    };
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}
