//! Config-driven [`NodeRegistry`].
//!
//! Nodes come from a `RENDER_NODES` string:
//!
//! ```text
//! gpu-a=http://10.0.0.5:8188|video,image;gpu-b=http://10.0.0.6:8188|image
//! ```
//!
//! Busy flags live in memory; the scheduler is their only writer.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use renderq_core::node::{Capability, ComputeNode, NodeRegistry};

use crate::config::ConfigError;

/// One configured node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub capabilities: Vec<Capability>,
}

struct Entry {
    spec: NodeSpec,
    busy: HashSet<Capability>,
}

pub struct StaticNodeRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl StaticNodeRegistry {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        let entries = nodes
            .into_iter()
            .map(|spec| Entry {
                spec,
                busy: HashSet::new(),
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Build from `RENDER_NODES`. An unset variable yields an empty registry.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("RENDER_NODES").unwrap_or_default();
        Ok(Self::new(parse_node_list(&raw)?))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeRegistry for StaticNodeRegistry {
    fn list_nodes(&self) -> Vec<ComputeNode> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|e| {
                let mut busy: Vec<Capability> = e.busy.iter().copied().collect();
                busy.sort();
                ComputeNode {
                    id: e.spec.id.clone(),
                    name: e.spec.name.clone(),
                    capabilities: e.spec.capabilities.clone(),
                    busy,
                }
            })
            .collect()
    }

    fn resolve_endpoint(&self, node_id: &str, capability: Capability) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|e| e.spec.id == node_id && e.spec.capabilities.contains(&capability))
            .map(|e| e.spec.endpoint.clone())
    }

    fn mark_busy(&self, node_id: &str, capability: Capability) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(e) = entries.iter_mut().find(|e| e.spec.id == node_id) {
            e.busy.insert(capability);
        }
    }

    fn mark_available(&self, node_id: &str, capability: Capability) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(e) = entries.iter_mut().find(|e| e.spec.id == node_id) {
            e.busy.remove(&capability);
        }
    }
}

/// Parse `id=url|cap,cap;...`. Blank entries are skipped.
pub fn parse_node_list(raw: &str) -> Result<Vec<NodeSpec>, ConfigError> {
    let mut nodes: Vec<NodeSpec> = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = |reason: &str| ConfigError::InvalidNode {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let (id, rest) = entry.split_once('=').ok_or_else(|| invalid("expected id=url|caps"))?;
        let (endpoint, caps) = rest.split_once('|').ok_or_else(|| invalid("missing capability list"))?;
        let id = id.trim();
        let endpoint = endpoint.trim().trim_end_matches('/');
        if id.is_empty() || endpoint.is_empty() {
            return Err(invalid("id and url must not be empty"));
        }
        if nodes.iter().any(|n| n.id == id) {
            return Err(invalid("duplicate node id"));
        }
        let mut capabilities = Vec::new();
        for cap in caps.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let cap: Capability = cap.parse().map_err(|_| invalid("unknown capability"))?;
            if !capabilities.contains(&cap) {
                capabilities.push(cap);
            }
        }
        if capabilities.is_empty() {
            return Err(invalid("no capabilities"));
        }
        nodes.push(NodeSpec {
            id: id.to_string(),
            name: id.to_string(),
            endpoint: endpoint.to_string(),
            capabilities,
        });
    }
    Ok(nodes)
}
