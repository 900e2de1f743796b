//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Shared via `Arc<EventBus>`. Publishing never blocks and never fails;
//! slow subscribers observe `RecvError::Lagged` and resync from a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use renderq_core::job::RenderJob;
use renderq_core::types::JobId;

// ---------------------------------------------------------------------------
// SchedulerEvent
// ---------------------------------------------------------------------------

/// A change observed by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A job was created or mutated. Carries the job as stored after the change.
    JobChanged { job: Box<RenderJob> },

    /// A job was deleted from the store.
    JobRemoved { job_id: JobId },

    /// Auto-run was switched on or off.
    SchedulerStateChanged {
        running: bool,
        timestamp: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub fn job_changed(job: RenderJob) -> Self {
        SchedulerEvent::JobChanged { job: Box::new(job) }
    }

    pub fn state_changed(running: bool) -> Self {
        SchedulerEvent::SchedulerStateChanged {
            running,
            timestamp: Utc::now(),
        }
    }

    /// Dot-separated event name, e.g. `"job.changed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::JobChanged { .. } => "job.changed",
            SchedulerEvent::JobRemoved { .. } => "job.removed",
            SchedulerEvent::SchedulerStateChanged { .. } => "scheduler.state_changed",
        }
    }

    /// Id of the job this event concerns, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SchedulerEvent::JobChanged { job } => Some(job.id),
            SchedulerEvent::JobRemoved { job_id } => Some(*job_id),
            SchedulerEvent::SchedulerStateChanged { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: SchedulerEvent) {
        tracing::trace!(event_type = event.event_type(), "Publishing scheduler event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
