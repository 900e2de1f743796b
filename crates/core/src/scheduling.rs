//! Job scheduling constants, dispatch ordering and the status state machine.
//!
//! Lives in `core` so the engine, the API layer and any tooling agree on
//! the same ordering and transition rules.

use std::cmp::Ordering;

use crate::job::RenderJob;

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Lower values dispatch first.
pub const PRIORITY_URGENT: i32 = 0;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 5;

/// Priority value for background jobs. Dispatched last.
pub const PRIORITY_BACKGROUND: i32 = 10;

// ---------------------------------------------------------------------------
// Attempt limits
// ---------------------------------------------------------------------------

/// Attempts allowed when a job does not set its own limit.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Ceiling on the per-job `max_attempts` a caller may request.
pub const MAX_ATTEMPTS_LIMIT: u32 = 20;

// ---------------------------------------------------------------------------
// Dispatch ordering
// ---------------------------------------------------------------------------

/// Queue order: `(priority asc, created_at asc)`, job id as a final
/// tie-breaker so the order is total.
pub fn queue_order(a: &RenderJob, b: &RenderJob) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort jobs into dispatch order in place.
pub fn sort_for_dispatch(jobs: &mut [RenderJob]) {
    jobs.sort_by(queue_order);
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use crate::job::JobStatus;

    /// Statuses reachable from `from`.
    ///
    /// `Completed` and `Failed` only leave through an explicit user retry,
    /// which re-queues the job.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        match from {
            JobStatus::Queued => &[JobStatus::Assigned],
            JobStatus::Assigned => &[JobStatus::Rendering, JobStatus::Queued, JobStatus::Failed],
            JobStatus::Rendering => &[JobStatus::Completed, JobStatus::Queued, JobStatus::Failed],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Queued],
        }
    }

    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning a readable message for invalid ones.
    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {from} -> {to}"))
        }
    }
}
