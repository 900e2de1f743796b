//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages shaped `{"type": "<kind>", "data": {...}}`.
//! Fields vary between ComfyUI versions, so everything beyond the
//! correlation ids is defaulted.

use serde::Deserialize;

/// Known ComfyUI WebSocket message types.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    #[serde(rename = "status")]
    Status(StatusData),

    #[serde(rename = "execution_start")]
    ExecutionStart(PromptRef),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A node is executing, or the prompt finished when `node` is `None`.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step-level progress from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Sent by newer ComfyUI builds after the last node.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptRef),

    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptRef),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload that only identifies a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Older builds omit `prompt_id` and `node`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i64,
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Percentage in `0..=100`. Zero when `max` is not positive.
    pub fn percent(&self) -> u8 {
        if self.max <= 0 {
            return 0;
        }
        let pct = (self.value as f64 / self.max as f64) * 100.0;
        pct.clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

impl ErrorData {
    /// Human-readable failure reason.
    pub fn message(&self) -> String {
        let msg = self.exception_message.trim();
        let kind = self.exception_type.trim();
        match (kind.is_empty(), msg.is_empty()) {
            (true, true) => "Execution error".to_string(),
            (false, true) => kind.to_string(),
            (true, false) => msg.to_string(),
            (false, false) => format!("{kind}: {msg}"),
        }
    }
}

/// Parse a text frame. Unknown `type` values are an error; callers log
/// and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        assert_matches!(
            parse_message(json).unwrap(),
            ComfyUIMessage::Status(d) if d.status.exec_info.queue_remaining == 3
        );
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let ComfyUIMessage::Executing(data) = parse_message(json).unwrap() else {
            panic!("expected Executing");
        };
        assert!(data.node.is_none());
        assert_eq!(data.prompt_id.as_deref(), Some("xyz"));
    }

    #[test]
    fn parse_progress_with_and_without_prompt_id() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20}}"#;
        let ComfyUIMessage::Progress(data) = parse_message(json).unwrap() else {
            panic!("expected Progress");
        };
        assert!(data.prompt_id.is_none());
        assert_eq!(data.percent(), 25);

        let json = r#"{"type":"progress","data":{"value":20,"max":20,"prompt_id":"p","node":"8"}}"#;
        let ComfyUIMessage::Progress(data) = parse_message(json).unwrap() else {
            panic!("expected Progress");
        };
        assert_eq!(data.prompt_id.as_deref(), Some("p"));
        assert_eq!(data.percent(), 100);
    }

    #[test]
    fn progress_percent_is_clamped() {
        let over = ProgressData { value: 30, max: 20, prompt_id: None, node: None };
        assert_eq!(over.percent(), 100);
        let zero_max = ProgressData { value: 3, max: 0, prompt_id: None, node: None };
        assert_eq!(zero_max.percent(), 0);
        let negative = ProgressData { value: -3, max: 10, prompt_id: None, node: None };
        assert_eq!(negative.percent(), 0);
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        let ComfyUIMessage::ExecutionError(data) = parse_message(json).unwrap() else {
            panic!("expected ExecutionError");
        };
        assert_eq!(data.node_id.as_deref(), Some("5"));
        assert_eq!(data.message(), "RuntimeError: out of memory");
    }

    #[test]
    fn error_message_falls_back() {
        let data = ErrorData {
            prompt_id: "p".into(),
            node_id: None,
            exception_message: String::new(),
            exception_type: String::new(),
        };
        assert_eq!(data.message(), "Execution error");
    }

    #[test]
    fn parse_success_and_interrupted() {
        let ok = r#"{"type":"execution_success","data":{"prompt_id":"p","timestamp":1}}"#;
        assert_matches!(parse_message(ok).unwrap(), ComfyUIMessage::ExecutionSuccess(d) if d.prompt_id == "p");
        let int = r#"{"type":"execution_interrupted","data":{"prompt_id":"p","node_id":"8"}}"#;
        assert_matches!(parse_message(int).unwrap(), ComfyUIMessage::ExecutionInterrupted(_));
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        assert!(parse_message(r#"{"type":"crystools.monitor","data":{}}"#).is_err());
        assert!(parse_message("not json at all").is_err());
    }
}
