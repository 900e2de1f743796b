//! Compute node model and the node registry seam.
//!
//! Node discovery lives outside the scheduler. The scheduler only sees the
//! registry through [`NodeRegistry`]: a snapshot list of nodes with their
//! capabilities and per-capability busy flags, an endpoint resolver, and
//! the busy/available setters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, NodeId};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A named ability a compute node advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Runs text-to-video / image-to-video generation graphs.
    VideoGeneration,
    /// Runs still-image generation graphs.
    ImageGeneration,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::VideoGeneration, Capability::ImageGeneration];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::VideoGeneration => "video_generation",
            Capability::ImageGeneration => "image_generation",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = CoreError;

    /// Accepts the canonical snake_case names plus the short forms
    /// `video` and `image` used in node list configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video_generation" | "video" => Ok(Capability::VideoGeneration),
            "image_generation" | "image" => Ok(Capability::ImageGeneration),
            other => Err(CoreError::Validation(format!("Unknown capability '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ComputeNode
// ---------------------------------------------------------------------------

/// Registry snapshot of one compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeNode {
    pub id: NodeId,
    pub name: String,
    /// Capabilities the node declares.
    pub capabilities: Vec<Capability>,
    /// Capabilities the registry currently reports as busy.
    pub busy: Vec<Capability>,
}

impl ComputeNode {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_busy(&self, capability: Capability) -> bool {
        self.busy.contains(&capability)
    }

    /// True when the node declares `capability` and the registry reports it free.
    pub fn is_available(&self, capability: Capability) -> bool {
        self.supports(capability) && !self.is_busy(capability)
    }
}

/// Per-node view exposed to the authoring pipeline and UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub name: String,
    pub busy: bool,
    pub current_job: Option<JobId>,
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Read/flag interface onto the external node registry.
///
/// Implementations are expected to be cheap, in-memory views over whatever
/// discovery mechanism feeds them; every method is synchronous so the
/// scheduler can flip busy flags before it yields to any dispatch future.
pub trait NodeRegistry: Send + Sync {
    /// All known nodes, in registry order.
    fn list_nodes(&self) -> Vec<ComputeNode>;

    /// Nodes that declare `capability` and are not flagged busy for it.
    fn list_capable_available_nodes(&self, capability: Capability) -> Vec<ComputeNode> {
        self.list_nodes()
            .into_iter()
            .filter(|node| node.is_available(capability))
            .collect()
    }

    fn is_busy(&self, node_id: &str, capability: Capability) -> bool {
        self.list_nodes()
            .iter()
            .any(|node| node.id == node_id && node.is_busy(capability))
    }

    /// Base HTTP endpoint for `node_id` serving `capability`.
    fn resolve_endpoint(&self, node_id: &str, capability: Capability) -> Option<String>;

    fn mark_busy(&self, node_id: &str, capability: Capability);

    fn mark_available(&self, node_id: &str, capability: Capability);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(caps: &[Capability], busy: &[Capability]) -> ComputeNode {
        ComputeNode {
            id: "n1".into(),
            name: "n1".into(),
            capabilities: caps.to_vec(),
            busy: busy.to_vec(),
        }
    }

    #[test]
    fn capability_parses_short_and_long_forms() {
        assert_eq!("video".parse::<Capability>().unwrap(), Capability::VideoGeneration);
        assert_eq!(
            "Image_Generation".parse::<Capability>().unwrap(),
            Capability::ImageGeneration
        );
        assert!("audio".parse::<Capability>().is_err());
    }

    #[test]
    fn busy_capability_is_not_available() {
        let n = node(
            &[Capability::VideoGeneration, Capability::ImageGeneration],
            &[Capability::VideoGeneration],
        );
        assert!(!n.is_available(Capability::VideoGeneration));
        assert!(n.is_available(Capability::ImageGeneration));
    }

    #[test]
    fn undeclared_capability_is_not_available() {
        let n = node(&[Capability::ImageGeneration], &[]);
        assert!(!n.is_available(Capability::VideoGeneration));
    }
}
