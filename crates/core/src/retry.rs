//! Bounded-attempts retry policy.
//!
//! An attempt is counted when it begins ([`begin_attempt`]), so after the
//! n-th failure `attempts == n` and a job that succeeds on its third
//! dispatch reports `attempts == 3`. [`apply_failure`] compares that count
//! with `max_attempts`: below the limit the job is re-queued, at the limit
//! it fails for good. `attempts` never exceeds `max_attempts`.

use crate::job::{JobStatus, RenderJob};
use crate::types::{NodeId, Timestamp};

/// What the policy decided for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `queued` for another attempt.
    Requeue,
    /// Terminal `failed`.
    Fail,
}

/// Pure decision on an already-counted attempt.
pub fn decide(attempts: u32, max_attempts: u32) -> RetryDecision {
    if attempts < max_attempts {
        RetryDecision::Requeue
    } else {
        RetryDecision::Fail
    }
}

/// Start a new attempt: `queued -> assigned` on `node_id`.
///
/// Returns `false` (leaving the job untouched) when the job is not queued
/// or has no attempts left.
pub fn begin_attempt(job: &mut RenderJob, node_id: &str, now: Timestamp) -> bool {
    if job.status != JobStatus::Queued || job.attempts >= job.max_attempts {
        return false;
    }
    job.attempts += 1;
    job.status = JobStatus::Assigned;
    job.assigned_node = Some(NodeId::from(node_id));
    job.progress = 0;
    job.last_activity_at = Some(now);
    true
}

/// Apply a failed attempt to `job`.
///
/// Non-retryable failures fail the job regardless of attempts left.
pub fn apply_failure(
    job: &mut RenderJob,
    message: &str,
    retryable: bool,
    now: Timestamp,
) -> RetryDecision {
    let decision = if retryable {
        decide(job.attempts, job.max_attempts)
    } else {
        RetryDecision::Fail
    };

    job.error = Some(message.to_string());
    job.detach();

    match decision {
        RetryDecision::Requeue => {
            job.status = JobStatus::Queued;
            job.progress = 0;
            job.started_at = None;
            job.last_activity_at = None;
        }
        RetryDecision::Fail => {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
        }
    }
    decision
}

/// Apply a successful attempt to `job`.
pub fn apply_completion(
    job: &mut RenderJob,
    output_url: Option<String>,
    thumbnail_url: Option<String>,
    now: Timestamp,
) {
    job.status = JobStatus::Completed;
    job.progress = 100;
    job.output_url = output_url;
    job.thumbnail_url = thumbnail_url;
    job.completed_at = Some(now);
    job.last_activity_at = Some(now);
    job.assigned_node = None;
}
