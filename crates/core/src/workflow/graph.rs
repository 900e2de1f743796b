//! Helpers for editing ComfyUI API-format graphs.
//!
//! A graph is a JSON object keyed by node id; each node is
//! `{"class_type": ..., "inputs": {...}}`.

use serde_json::Value;

use crate::error::CoreError;

/// Overwrite `inputs[input]` on node `node` with `value`.
///
/// A missing node means the template and its injection table disagree,
/// which is reported as an internal error rather than silently skipped.
pub fn set_input(
    graph: &mut Value,
    node: &str,
    input: &str,
    value: impl Into<Value>,
) -> Result<(), CoreError> {
    let inputs = graph
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| CoreError::Internal(format!("Template has no node '{node}'")))?;
    inputs.insert(input.to_string(), value.into());
    Ok(())
}

/// Read `inputs[input]` on node `node`.
pub fn input<'a>(graph: &'a Value, node: &str, input: &str) -> Option<&'a Value> {
    graph.get(node)?.get("inputs")?.get(input)
}

/// `class_type` of node `node`.
pub fn class_type<'a>(graph: &'a Value, node: &str) -> Option<&'a str> {
    graph.get(node)?.get("class_type")?.as_str()
}

/// Node ids whose `class_type` equals `class`, in key order.
pub fn nodes_of_class<'a>(graph: &'a Value, class: &str) -> Vec<&'a str> {
    let Some(nodes) = graph.as_object() else {
        return Vec::new();
    };
    nodes
        .iter()
        .filter(|(_, n)| n.get("class_type").and_then(Value::as_str) == Some(class))
        .map(|(id, _)| id.as_str())
        .collect()
}
