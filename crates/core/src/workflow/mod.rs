//! Workflow template builder.
//!
//! Compiles a [`RenderJob`] into a ComfyUI API-format graph. Building is a
//! pure function of its inputs apart from the random seed drawn when the
//! job does not pin one: repeated builds differ only in seed inputs.

pub mod graph;
mod templates;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::job::RenderJob;
use crate::node::Capability;

pub use templates::SeedInput;
use templates::{template, BuildParams};

/// Largest seed drawn at random; keeps seeds exact in JSON consumers that
/// read numbers as doubles.
pub const MAX_RANDOM_SEED: u64 = (1 << 53) - 1;

/// Output files land under `renderq/<job-id>` on the node.
pub const OUTPUT_PREFIX_ROOT: &str = "renderq";

// ---------------------------------------------------------------------------
// WorkflowKind
// ---------------------------------------------------------------------------

/// Registered workflow templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowKind {
    /// Wan 2.1 text-to-video, single KSampler.
    #[serde(rename = "wan_t2v")]
    WanTextToVideo,
    /// Wan 2.2 high-noise / low-noise two-stage sampling.
    #[serde(rename = "wan22_two_stage")]
    WanTwoStage,
    /// HunyuanVideo with custom sampler and Flux-style guidance.
    #[serde(rename = "hunyuan_video")]
    HunyuanVideo,
    /// Flux still image.
    #[serde(rename = "flux_image")]
    FluxImage,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::WanTextToVideo,
        WorkflowKind::WanTwoStage,
        WorkflowKind::HunyuanVideo,
        WorkflowKind::FluxImage,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            WorkflowKind::WanTextToVideo => "wan_t2v",
            WorkflowKind::WanTwoStage => "wan22_two_stage",
            WorkflowKind::HunyuanVideo => "hunyuan_video",
            WorkflowKind::FluxImage => "flux_image",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowKind::WanTextToVideo => "Wan 2.1 text-to-video",
            WorkflowKind::WanTwoStage => "Wan 2.2 two-stage",
            WorkflowKind::HunyuanVideo => "HunyuanVideo",
            WorkflowKind::FluxImage => "Flux image",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            WorkflowKind::FluxImage => Capability::ImageGeneration,
            _ => Capability::VideoGeneration,
        }
    }

    /// Relative resource cost of one run, for display and planning.
    pub fn estimated_cost(&self) -> u32 {
        match self {
            WorkflowKind::WanTextToVideo => 24,
            WorkflowKind::WanTwoStage => 40,
            WorkflowKind::HunyuanVideo => 32,
            WorkflowKind::FluxImage => 12,
        }
    }

    /// Graph inputs that receive the seed or a value derived from it.
    pub fn seed_inputs(&self) -> &'static [SeedInput] {
        template(*self).seeds
    }

    /// Asset slots this template accepts overrides for.
    pub fn asset_slots(&self) -> Vec<AssetSlot> {
        let mut slots: Vec<AssetSlot> = Vec::new();
        for binding in template(*self).assets {
            if !slots.contains(&binding.slot) {
                slots.push(binding.slot);
            }
        }
        slots
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for WorkflowKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowKind::ALL
            .into_iter()
            .find(|kind| kind.id() == s)
            .ok_or_else(|| CoreError::UnknownWorkflow(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Asset slots
// ---------------------------------------------------------------------------

/// Named model/asset inputs a caller may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSlot {
    Model,
    HighNoiseModel,
    LowNoiseModel,
    TextEncoder,
    Vae,
    Lora,
}

impl AssetSlot {
    pub fn key(&self) -> &'static str {
        match self {
            AssetSlot::Model => "model",
            AssetSlot::HighNoiseModel => "high_noise_model",
            AssetSlot::LowNoiseModel => "low_noise_model",
            AssetSlot::TextEncoder => "text_encoder",
            AssetSlot::Vae => "vae",
            AssetSlot::Lora => "lora",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "model" => Some(AssetSlot::Model),
            "high_noise_model" => Some(AssetSlot::HighNoiseModel),
            "low_noise_model" => Some(AssetSlot::LowNoiseModel),
            "text_encoder" => Some(AssetSlot::TextEncoder),
            "vae" => Some(AssetSlot::Vae),
            "lora" => Some(AssetSlot::Lora),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// A compiled, ready-to-submit graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltWorkflow {
    pub graph: Value,
    pub kind: WorkflowKind,
    /// Primary seed written into the graph.
    pub seed: u64,
    pub estimated_cost: u32,
    /// Non-fatal build notes. Currently always empty.
    pub warnings: Vec<String>,
}

/// Catalog entry for a registered template.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub capability: Capability,
    pub estimated_cost: u32,
    pub asset_slots: Vec<AssetSlot>,
}

pub fn catalog() -> Vec<WorkflowInfo> {
    WorkflowKind::ALL
        .into_iter()
        .map(|kind| WorkflowInfo {
            id: kind.id(),
            name: kind.display_name(),
            capability: kind.capability(),
            estimated_cost: kind.estimated_cost(),
            asset_slots: kind.asset_slots(),
        })
        .collect()
}

/// Output filename prefix for `job`.
pub fn output_prefix(job: &RenderJob) -> String {
    format!("{OUTPUT_PREFIX_ROOT}/{}", job.id)
}

/// Compile `job` with template `kind`.
///
/// `overrides` are merged over the job's own `asset_overrides`. Keys that
/// name no slot, or a slot the template lacks, are ignored.
pub fn build(
    job: &RenderJob,
    kind: WorkflowKind,
    overrides: &BTreeMap<String, String>,
) -> Result<BuiltWorkflow, CoreError> {
    let resolution = job.settings.resolution()?;
    let seed = job
        .settings
        .seed
        .unwrap_or_else(|| rand::rng().random_range(0..=MAX_RANDOM_SEED));
    let prefix = output_prefix(job);
    let tpl = template(kind);

    let mut graph = Value::clone(tpl.graph);
    let params = BuildParams {
        positive: &job.positive_prompt,
        negative: &job.negative_prompt,
        width: resolution.width,
        height: resolution.height,
        frames: job.settings.frame_count,
        fps: job.settings.fps,
        steps: job.settings.sampler_steps,
        cfg: job.settings.cfg_scale,
        prefix: &prefix,
    };
    (tpl.inject)(&mut graph, &params)?;

    for s in tpl.seeds {
        graph::set_input(&mut graph, s.node, s.input, seed.wrapping_add(s.offset))?;
    }

    let mut assets = job.asset_overrides.clone();
    assets.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    for (key, value) in &assets {
        let Some(slot) = AssetSlot::from_key(key) else {
            continue;
        };
        for binding in tpl.assets.iter().filter(|b| b.slot == slot) {
            graph::set_input(&mut graph, binding.node, binding.input, value.as_str())?;
        }
    }

    Ok(BuiltWorkflow {
        graph,
        kind,
        seed,
        estimated_cost: kind.estimated_cost(),
        warnings: Vec::new(),
    })
}

/// Resolve `workflow_id` and compile. Unknown ids fail with
/// [`CoreError::UnknownWorkflow`].
pub fn build_by_id(
    job: &RenderJob,
    workflow_id: &str,
    overrides: &BTreeMap<String, String>,
) -> Result<BuiltWorkflow, CoreError> {
    let kind: WorkflowKind = workflow_id.parse()?;
    build(job, kind, overrides)
}
