//! Canonical ComfyUI graphs and their injection tables.
//!
//! Each template is built once into a [`LazyLock`] and never mutated.
//! Builds clone the canonical graph and write job values into it through
//! the template's `inject` function, seed table and asset bindings.

use std::sync::LazyLock;

use serde_json::{json, Value};

use super::graph::set_input;
use super::{AssetSlot, WorkflowKind};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Template table
// ---------------------------------------------------------------------------

/// Values written into a cloned template.
pub(crate) struct BuildParams<'a> {
    pub positive: &'a str,
    pub negative: &'a str,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub fps: u32,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub prefix: &'a str,
}

/// A sampler seed input. The written value is `seed.wrapping_add(offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedInput {
    pub node: &'static str,
    pub input: &'static str,
    pub offset: u64,
}

/// Where an asset slot lands in a template. One slot may feed several nodes.
pub(crate) struct AssetBinding {
    pub slot: AssetSlot,
    pub node: &'static str,
    pub input: &'static str,
}

pub(crate) struct Template {
    pub graph: &'static LazyLock<Value>,
    pub inject: fn(&mut Value, &BuildParams<'_>) -> Result<(), CoreError>,
    pub seeds: &'static [SeedInput],
    pub assets: &'static [AssetBinding],
}

pub(crate) fn template(kind: WorkflowKind) -> &'static Template {
    match kind {
        WorkflowKind::WanTextToVideo => &WAN_T2V,
        WorkflowKind::WanTwoStage => &WAN22_TWO_STAGE,
        WorkflowKind::HunyuanVideo => &HUNYUAN_VIDEO,
        WorkflowKind::FluxImage => &FLUX_IMAGE,
    }
}

const VIDEO_FORMAT: &str = "video/h264-mp4";

fn video_combine(images: &str) -> Value {
    json!({
        "class_type": "VHS_VideoCombine",
        "inputs": {
            "images": [images, 0],
            "frame_rate": 16,
            "loop_count": 0,
            "filename_prefix": "",
            "format": VIDEO_FORMAT,
            "pingpong": false,
            "save_output": true
        }
    })
}

fn video_latent() -> Value {
    json!({
        "class_type": "EmptyHunyuanLatentVideo",
        "inputs": {"width": 832, "height": 480, "length": 33, "batch_size": 1}
    })
}

fn text_encode(clip: &str) -> Value {
    json!({"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": [clip, 0]}})
}

// ---------------------------------------------------------------------------
// wan_t2v
// ---------------------------------------------------------------------------

static WAN_T2V_GRAPH: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "1": {"class_type": "UNETLoader", "inputs": {
            "unet_name": "wan2.1_t2v_14B_fp16.safetensors", "weight_dtype": "default"}},
        "2": {"class_type": "CLIPLoader", "inputs": {
            "clip_name": "umt5_xxl_fp8_e4m3fn_scaled.safetensors", "type": "wan"}},
        "3": {"class_type": "VAELoader", "inputs": {"vae_name": "wan_2.1_vae.safetensors"}},
        "4": {"class_type": "ModelSamplingSD3", "inputs": {"shift": 8.0, "model": ["1", 0]}},
        "5": text_encode("2"),
        "6": text_encode("2"),
        "7": video_latent(),
        "8": {"class_type": "KSampler", "inputs": {
            "seed": 0, "steps": 30, "cfg": 6.0,
            "sampler_name": "uni_pc", "scheduler": "simple", "denoise": 1.0,
            "model": ["4", 0], "positive": ["5", 0], "negative": ["6", 0],
            "latent_image": ["7", 0]}},
        "9": {"class_type": "VAEDecode", "inputs": {"samples": ["8", 0], "vae": ["3", 0]}},
        "10": video_combine("9"),
    })
});

fn inject_wan_t2v(graph: &mut Value, p: &BuildParams<'_>) -> Result<(), CoreError> {
    set_input(graph, "5", "text", p.positive)?;
    set_input(graph, "6", "text", p.negative)?;
    set_latent(graph, "7", p)?;
    if let Some(steps) = p.steps {
        set_input(graph, "8", "steps", steps)?;
    }
    if let Some(cfg) = p.cfg {
        set_input(graph, "8", "cfg", cfg)?;
    }
    set_video_output(graph, "10", p)
}

static WAN_T2V: Template = Template {
    graph: &WAN_T2V_GRAPH,
    inject: inject_wan_t2v,
    seeds: &[SeedInput { node: "8", input: "seed", offset: 0 }],
    assets: &[
        AssetBinding { slot: AssetSlot::Model, node: "1", input: "unet_name" },
        AssetBinding { slot: AssetSlot::TextEncoder, node: "2", input: "clip_name" },
        AssetBinding { slot: AssetSlot::Vae, node: "3", input: "vae_name" },
    ],
};

// ---------------------------------------------------------------------------
// wan22_two_stage
// ---------------------------------------------------------------------------

/// Total sampler steps; stage 1 runs the first half on the high-noise model.
const WAN22_DEFAULT_STEPS: u32 = 20;

static WAN22_TWO_STAGE_GRAPH: LazyLock<Value> = LazyLock::new(|| {
    let half = WAN22_DEFAULT_STEPS / 2;
    json!({
        "1": {"class_type": "UNETLoader", "inputs": {
            "unet_name": "wan2.2_t2v_high_noise_14B_fp8_scaled.safetensors",
            "weight_dtype": "default"}},
        "2": {"class_type": "UNETLoader", "inputs": {
            "unet_name": "wan2.2_t2v_low_noise_14B_fp8_scaled.safetensors",
            "weight_dtype": "default"}},
        "3": {"class_type": "CLIPLoader", "inputs": {
            "clip_name": "umt5_xxl_fp8_e4m3fn_scaled.safetensors", "type": "wan"}},
        "4": {"class_type": "VAELoader", "inputs": {"vae_name": "wan_2.1_vae.safetensors"}},
        "5": {"class_type": "LoraLoaderModelOnly", "inputs": {
            "lora_name": "wan2.2_t2v_lightx2v_4steps_lora_high_noise.safetensors",
            "strength_model": 1.0, "model": ["1", 0]}},
        "6": {"class_type": "LoraLoaderModelOnly", "inputs": {
            "lora_name": "wan2.2_t2v_lightx2v_4steps_lora_low_noise.safetensors",
            "strength_model": 1.0, "model": ["2", 0]}},
        "7": {"class_type": "ModelSamplingSD3", "inputs": {"shift": 8.0, "model": ["5", 0]}},
        "8": {"class_type": "ModelSamplingSD3", "inputs": {"shift": 8.0, "model": ["6", 0]}},
        "9": text_encode("3"),
        "10": text_encode("3"),
        "11": video_latent(),
        "12": {"class_type": "KSamplerAdvanced", "inputs": {
            "add_noise": "enable", "noise_seed": 0,
            "steps": WAN22_DEFAULT_STEPS, "cfg": 3.5,
            "sampler_name": "euler", "scheduler": "simple",
            "start_at_step": 0, "end_at_step": half,
            "return_with_leftover_noise": "enable",
            "model": ["7", 0], "positive": ["9", 0], "negative": ["10", 0],
            "latent_image": ["11", 0]}},
        "13": {"class_type": "KSamplerAdvanced", "inputs": {
            "add_noise": "disable", "noise_seed": 0,
            "steps": WAN22_DEFAULT_STEPS, "cfg": 3.5,
            "sampler_name": "euler", "scheduler": "simple",
            "start_at_step": half, "end_at_step": 10000,
            "return_with_leftover_noise": "disable",
            "model": ["8", 0], "positive": ["9", 0], "negative": ["10", 0],
            "latent_image": ["12", 0]}},
        "14": {"class_type": "VAEDecode", "inputs": {"samples": ["13", 0], "vae": ["4", 0]}},
        "15": video_combine("14"),
    })
});

fn inject_wan22_two_stage(graph: &mut Value, p: &BuildParams<'_>) -> Result<(), CoreError> {
    set_input(graph, "9", "text", p.positive)?;
    set_input(graph, "10", "text", p.negative)?;
    set_latent(graph, "11", p)?;
    if let Some(steps) = p.steps {
        let half = steps / 2;
        for stage in ["12", "13"] {
            set_input(graph, stage, "steps", steps)?;
        }
        set_input(graph, "12", "end_at_step", half)?;
        set_input(graph, "13", "start_at_step", half)?;
    }
    if let Some(cfg) = p.cfg {
        for stage in ["12", "13"] {
            set_input(graph, stage, "cfg", cfg)?;
        }
    }
    set_video_output(graph, "15", p)
}

static WAN22_TWO_STAGE: Template = Template {
    graph: &WAN22_TWO_STAGE_GRAPH,
    inject: inject_wan22_two_stage,
    seeds: &[
        SeedInput { node: "12", input: "noise_seed", offset: 0 },
        SeedInput { node: "13", input: "noise_seed", offset: 1 },
    ],
    assets: &[
        AssetBinding { slot: AssetSlot::HighNoiseModel, node: "1", input: "unet_name" },
        AssetBinding { slot: AssetSlot::LowNoiseModel, node: "2", input: "unet_name" },
        AssetBinding { slot: AssetSlot::TextEncoder, node: "3", input: "clip_name" },
        AssetBinding { slot: AssetSlot::Vae, node: "4", input: "vae_name" },
        AssetBinding { slot: AssetSlot::Lora, node: "5", input: "lora_name" },
        AssetBinding { slot: AssetSlot::Lora, node: "6", input: "lora_name" },
    ],
};

// ---------------------------------------------------------------------------
// hunyuan_video
// ---------------------------------------------------------------------------

static HUNYUAN_VIDEO_GRAPH: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "1": {"class_type": "UNETLoader", "inputs": {
            "unet_name": "hunyuan_video_t2v_720p_bf16.safetensors", "weight_dtype": "default"}},
        "2": {"class_type": "DualCLIPLoader", "inputs": {
            "clip_name1": "clip_l.safetensors",
            "clip_name2": "llava_llama3_fp8_scaled.safetensors",
            "type": "hunyuan_video"}},
        "3": {"class_type": "VAELoader", "inputs": {"vae_name": "hunyuan_video_vae_bf16.safetensors"}},
        "4": text_encode("2"),
        "5": {"class_type": "FluxGuidance", "inputs": {"guidance": 6.0, "conditioning": ["4", 0]}},
        "6": video_latent(),
        "7": {"class_type": "RandomNoise", "inputs": {"noise_seed": 0}},
        "8": {"class_type": "KSamplerSelect", "inputs": {"sampler_name": "euler"}},
        "9": {"class_type": "BasicScheduler", "inputs": {
            "scheduler": "simple", "steps": 20, "denoise": 1.0, "model": ["1", 0]}},
        "10": {"class_type": "BasicGuider", "inputs": {"model": ["1", 0], "conditioning": ["5", 0]}},
        "11": {"class_type": "SamplerCustomAdvanced", "inputs": {
            "noise": ["7", 0], "guider": ["10", 0], "sampler": ["8", 0],
            "sigmas": ["9", 0], "latent_image": ["6", 0]}},
        "12": {"class_type": "VAEDecodeTiled", "inputs": {
            "samples": ["11", 0], "vae": ["3", 0],
            "tile_size": 256, "overlap": 64, "temporal_size": 64, "temporal_overlap": 8}},
        "13": video_combine("12"),
    })
});

/// Hunyuan has no negative conditioning; cfg maps to the guidance node.
fn inject_hunyuan_video(graph: &mut Value, p: &BuildParams<'_>) -> Result<(), CoreError> {
    set_input(graph, "4", "text", p.positive)?;
    set_latent(graph, "6", p)?;
    if let Some(steps) = p.steps {
        set_input(graph, "9", "steps", steps)?;
    }
    if let Some(cfg) = p.cfg {
        set_input(graph, "5", "guidance", cfg)?;
    }
    set_video_output(graph, "13", p)
}

static HUNYUAN_VIDEO: Template = Template {
    graph: &HUNYUAN_VIDEO_GRAPH,
    inject: inject_hunyuan_video,
    seeds: &[SeedInput { node: "7", input: "noise_seed", offset: 0 }],
    assets: &[
        AssetBinding { slot: AssetSlot::Model, node: "1", input: "unet_name" },
        AssetBinding { slot: AssetSlot::TextEncoder, node: "2", input: "clip_name2" },
        AssetBinding { slot: AssetSlot::Vae, node: "3", input: "vae_name" },
    ],
};

// ---------------------------------------------------------------------------
// flux_image
// ---------------------------------------------------------------------------

static FLUX_IMAGE_GRAPH: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "1": {"class_type": "UNETLoader", "inputs": {
            "unet_name": "flux1-dev.safetensors", "weight_dtype": "default"}},
        "2": {"class_type": "DualCLIPLoader", "inputs": {
            "clip_name1": "clip_l.safetensors",
            "clip_name2": "t5xxl_fp8_e4m3fn.safetensors",
            "type": "flux"}},
        "3": {"class_type": "VAELoader", "inputs": {"vae_name": "ae.safetensors"}},
        "4": text_encode("2"),
        "5": {"class_type": "FluxGuidance", "inputs": {"guidance": 3.5, "conditioning": ["4", 0]}},
        "6": text_encode("2"),
        "7": {"class_type": "EmptySD3LatentImage", "inputs": {
            "width": 1024, "height": 1024, "batch_size": 1}},
        "8": {"class_type": "KSampler", "inputs": {
            "seed": 0, "steps": 20, "cfg": 1.0,
            "sampler_name": "euler", "scheduler": "simple", "denoise": 1.0,
            "model": ["1", 0], "positive": ["5", 0], "negative": ["6", 0],
            "latent_image": ["7", 0]}},
        "9": {"class_type": "VAEDecode", "inputs": {"samples": ["8", 0], "vae": ["3", 0]}},
        "10": {"class_type": "SaveImage", "inputs": {"filename_prefix": "", "images": ["9", 0]}},
    })
});

/// Still image: frame count and fps do not apply. cfg maps to Flux guidance.
fn inject_flux_image(graph: &mut Value, p: &BuildParams<'_>) -> Result<(), CoreError> {
    set_input(graph, "4", "text", p.positive)?;
    set_input(graph, "6", "text", p.negative)?;
    set_input(graph, "7", "width", p.width)?;
    set_input(graph, "7", "height", p.height)?;
    if let Some(steps) = p.steps {
        set_input(graph, "8", "steps", steps)?;
    }
    if let Some(cfg) = p.cfg {
        set_input(graph, "5", "guidance", cfg)?;
    }
    set_input(graph, "10", "filename_prefix", p.prefix)
}

static FLUX_IMAGE: Template = Template {
    graph: &FLUX_IMAGE_GRAPH,
    inject: inject_flux_image,
    seeds: &[SeedInput { node: "8", input: "seed", offset: 0 }],
    assets: &[
        AssetBinding { slot: AssetSlot::Model, node: "1", input: "unet_name" },
        AssetBinding { slot: AssetSlot::TextEncoder, node: "2", input: "clip_name2" },
        AssetBinding { slot: AssetSlot::Vae, node: "3", input: "vae_name" },
    ],
};

// ---- shared injectors ----

fn set_latent(graph: &mut Value, node: &str, p: &BuildParams<'_>) -> Result<(), CoreError> {
    set_input(graph, node, "width", p.width)?;
    set_input(graph, node, "height", p.height)?;
    set_input(graph, node, "length", p.frames)
}

fn set_video_output(graph: &mut Value, node: &str, p: &BuildParams<'_>) -> Result<(), CoreError> {
    set_input(graph, node, "frame_rate", p.fps)?;
    set_input(graph, node, "filename_prefix", p.prefix)
}
