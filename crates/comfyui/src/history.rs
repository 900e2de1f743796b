//! Interpretation of `GET /history/{prompt_id}` responses.
//!
//! ```json
//! {"<prompt_id>": {
//!     "outputs": {"10": {"gifs": [{"filename": "a.mp4", "subfolder": "renderq/..", "type": "output"}]}},
//!     "status": {"status_str": "success", "completed": true, "messages": [...]}
//! }}
//! ```

use serde_json::Value;

use renderq_core::backend::{ArtifactKind, HistoryOutcome, OutputArtifact};

/// Output keys that hold file listings, in preference order.
const OUTPUT_KEYS: [&str; 3] = ["gifs", "videos", "images"];

const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "webm", "mov", "mkv", "gif", "webp"];

/// Reduce a history response to a [`HistoryOutcome`].
///
/// A missing entry is `Pending`. `status_str == "error"` is `Failed` with
/// the recorded exception message. Otherwise the entry is `Succeeded` once
/// it lists outputs or is marked completed.
pub fn parse_history(prompt_id: &str, response: &Value) -> HistoryOutcome {
    let Some(entry) = response.get(prompt_id) else {
        return HistoryOutcome::Pending;
    };
    let status = entry.get("status");
    let status_str = status
        .and_then(|s| s.get("status_str"))
        .and_then(Value::as_str);

    if status_str == Some("error") {
        return HistoryOutcome::Failed {
            message: error_message(status).unwrap_or_else(|| "Execution failed".to_string()),
        };
    }

    let artifacts = collect_artifacts(entry.get("outputs"));
    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !artifacts.is_empty() || completed || status_str == Some("success") {
        HistoryOutcome::Succeeded { artifacts }
    } else {
        HistoryOutcome::Pending
    }
}

/// Find the `execution_error` entry in `status.messages`
/// (`[["execution_error", {"exception_message": ...}], ...]`).
fn error_message(status: Option<&Value>) -> Option<String> {
    let messages = status?.get("messages")?.as_array()?;
    messages.iter().find_map(|m| {
        let pair = m.as_array()?;
        if pair.first()?.as_str()? != "execution_error" {
            return None;
        }
        let data = pair.get(1)?;
        let msg = data.get("exception_message")?.as_str()?.trim();
        let kind = data.get("exception_type").and_then(Value::as_str).unwrap_or("");
        Some(if kind.is_empty() {
            msg.to_string()
        } else {
            format!("{kind}: {msg}")
        })
    })
}

fn collect_artifacts(outputs: Option<&Value>) -> Vec<OutputArtifact> {
    let Some(outputs) = outputs.and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut artifacts = Vec::new();
    for node_output in outputs.values() {
        for key in OUTPUT_KEYS {
            let Some(files) = node_output.get(key).and_then(Value::as_array) else {
                continue;
            };
            for file in files {
                // Preview nodes write to the temp folder; not deliverables.
                if file.get("type").and_then(Value::as_str) == Some("temp") {
                    continue;
                }
                let Some(filename) = file.get("filename").and_then(Value::as_str) else {
                    continue;
                };
                let subfolder = file
                    .get("subfolder")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                artifacts.push(OutputArtifact {
                    filename: filename.to_string(),
                    subfolder,
                    kind: artifact_kind(key, filename),
                });
            }
        }
    }
    artifacts
}

fn artifact_kind(key: &str, filename: &str) -> ArtifactKind {
    if key != "images" {
        return ArtifactKind::Video;
    }
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        ArtifactKind::Video
    } else {
        ArtifactKind::Image
    }
}
