//! Shared builders for unit tests.

use std::collections::BTreeMap;

use crate::job::{NewRenderJob, RenderJob, RenderSettings};
use crate::workflow::WorkflowKind;

pub(crate) fn new_job() -> NewRenderJob {
    NewRenderJob {
        source_ref: "story-1".into(),
        target_id: "shot-1".into(),
        target_number: 1,
        title: "Opening shot".into(),
        positive_prompt: "a lighthouse at dusk, waves crashing".into(),
        negative_prompt: "blurry, low quality".into(),
        settings: RenderSettings::default(),
        asset_overrides: BTreeMap::new(),
        priority: None,
        max_attempts: None,
    }
}

pub(crate) fn job_for(kind: WorkflowKind) -> RenderJob {
    let mut new = new_job();
    new.settings.workflow_kind = kind;
    RenderJob::from_new(new, uuid::Uuid::new_v4(), chrono::Utc::now(), 3)
}
