//! Render job model, submission DTO and status counters.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::Capability;
use crate::scheduling::{MAX_ATTEMPTS_LIMIT, PRIORITY_NORMAL};
use crate::types::{JobId, NodeId, Timestamp};
use crate::workflow::WorkflowKind;

/// Largest accepted width or height, in pixels.
const MAX_DIMENSION: u32 = 7680;

/// Upper bound on frames per job.
const MAX_FRAME_COUNT: u32 = 2048;

/// Upper bound on output frame rate.
const MAX_FPS: u32 = 120;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Assigned,
    Rendering,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Assigned => "assigned",
            JobStatus::Rendering => "rendering",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Holding a node: `assigned` or `rendering`.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Rendering)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Output dimensions parsed from a `"WIDTHxHEIGHT"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidResolution(s.to_string());
        let (w, h) = s
            .trim()
            .split_once(['x', 'X', '×'])
            .ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// RenderSettings
// ---------------------------------------------------------------------------

/// Generation settings carried by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub workflow_kind: WorkflowKind,
    pub frame_count: u32,
    pub fps: u32,
    /// `"WIDTHxHEIGHT"`, e.g. `"832x480"`.
    pub resolution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    /// Pinned sampler seed. A fresh seed is drawn per build when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl RenderSettings {
    pub fn resolution(&self) -> Result<Resolution, CoreError> {
        self.resolution.parse()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.resolution()?;
        if self.frame_count == 0 || self.frame_count > MAX_FRAME_COUNT {
            return Err(CoreError::Validation(format!(
                "frame_count must be between 1 and {MAX_FRAME_COUNT}"
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(CoreError::Validation(format!(
                "fps must be between 1 and {MAX_FPS}"
            )));
        }
        if self.sampler_steps == Some(0) {
            return Err(CoreError::Validation(
                "sampler_steps must be positive".to_string(),
            ));
        }
        if let Some(cfg) = self.cfg_scale {
            if !cfg.is_finite() || cfg <= 0.0 {
                return Err(CoreError::Validation(
                    "cfg_scale must be a positive number".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RenderJob
// ---------------------------------------------------------------------------

/// One unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: JobId,
    /// Owning story or shot-list id.
    pub source_ref: String,
    /// Scene or shot being rendered.
    pub target_id: String,
    pub target_number: u32,
    pub title: String,

    pub positive_prompt: String,
    pub negative_prompt: String,
    pub settings: RenderSettings,
    /// Per-job asset slot overrides (slot key -> asset name).
    #[serde(default)]
    pub asset_overrides: BTreeMap<String, String>,

    pub status: JobStatus,
    pub progress: u8,
    pub assigned_node: Option<NodeId>,
    /// Lower is more urgent.
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,

    pub output_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,

    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Last dispatch or progress signal seen for the current attempt.
    pub last_activity_at: Option<Timestamp>,

    /// Prompt id the node returned at dispatch time.
    pub backend_job_id: Option<String>,
    /// Client id the push channel is scoped by.
    pub client_id: Option<String>,
}

impl RenderJob {
    /// Materialize a submitted job in `queued` status.
    pub fn from_new(new: NewRenderJob, id: JobId, now: Timestamp, default_max_attempts: u32) -> Self {
        Self {
            id,
            source_ref: new.source_ref,
            target_id: new.target_id,
            target_number: new.target_number,
            title: new.title,
            positive_prompt: new.positive_prompt,
            negative_prompt: new.negative_prompt,
            settings: new.settings,
            asset_overrides: new.asset_overrides,
            status: JobStatus::Queued,
            progress: 0,
            assigned_node: None,
            priority: new.priority.unwrap_or(PRIORITY_NORMAL),
            attempts: 0,
            max_attempts: new.max_attempts.unwrap_or(default_max_attempts),
            output_url: None,
            thumbnail_url: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_activity_at: None,
            backend_job_id: None,
            client_id: None,
        }
    }

    /// Capability a node must declare to run this job.
    pub fn capability(&self) -> Capability {
        self.settings.workflow_kind.capability()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Put the job back in the queue with a clean attempt slate.
    ///
    /// Used by the explicit user retry; the automatic retry path goes
    /// through [`crate::retry::apply_failure`] instead.
    pub fn reset_for_retry(&mut self) {
        self.status = JobStatus::Queued;
        self.attempts = 0;
        self.progress = 0;
        self.error = None;
        self.assigned_node = None;
        self.backend_job_id = None;
        self.client_id = None;
        self.output_url = None;
        self.thumbnail_url = None;
        self.started_at = None;
        self.completed_at = None;
        self.last_activity_at = None;
    }

    /// Detach the job from its node and backend correlation ids.
    pub(crate) fn detach(&mut self) {
        self.assigned_node = None;
        self.backend_job_id = None;
        self.client_id = None;
    }
}

// ---------------------------------------------------------------------------
// NewRenderJob
// ---------------------------------------------------------------------------

/// DTO for submitting a new render job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewRenderJob {
    pub source_ref: String,
    pub target_id: String,
    #[serde(default)]
    pub target_number: u32,
    #[serde(default)]
    pub title: String,
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub settings: RenderSettings,
    #[serde(default)]
    pub asset_overrides: BTreeMap<String, String>,
    pub priority: Option<i32>,
    pub max_attempts: Option<u32>,
}

impl NewRenderJob {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.source_ref.trim().is_empty() {
            return Err(CoreError::Validation(
                "source_ref must not be empty".to_string(),
            ));
        }
        if self.target_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "target_id must not be empty".to_string(),
            ));
        }
        if self.positive_prompt.trim().is_empty() {
            return Err(CoreError::Validation(
                "positive_prompt must not be empty".to_string(),
            ));
        }
        if let Some(max) = self.max_attempts {
            if max == 0 || max > MAX_ATTEMPTS_LIMIT {
                return Err(CoreError::Validation(format!(
                    "max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}"
                )));
            }
        }
        self.settings.validate()
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            workflow_kind: WorkflowKind::WanTextToVideo,
            frame_count: 81,
            fps: 16,
            resolution: "832x480".to_string(),
            sampler_steps: None,
            cfg_scale: None,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status counts
// ---------------------------------------------------------------------------

/// Aggregate queue counters for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStatusCounts {
    pub queued: usize,
    /// `assigned` + `rendering`.
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl JobStatusCounts {
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a RenderJob>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            counts.total += 1;
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Assigned | JobStatus::Rendering => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
