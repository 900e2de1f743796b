//! Push-channel progress tracking.
//!
//! One connection per node with an active job, scoped by the client id the
//! job was dispatched with. The connection task reconnects with backoff
//! while the node still runs an active job and exits on cancellation or
//! once the node is idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use renderq_core::backend::{BackendEvent, BackendEventStream};
use renderq_core::types::{JobId, NodeId};

use crate::error::DispatchError;
use crate::reconnect::next_delay;
use crate::transition::{Shared, TerminalGuard};

struct Connection {
    /// Distinguishes reconnections that reuse a client id.
    generation: u64,
    client_id: String,
    cancel: CancellationToken,
    // Kept so the task is owned by the map; completion is signalled
    // through `cancel`, never by aborting.
    _handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct ProgressTracker {
    connections: Mutex<HashMap<NodeId, Connection>>,
    next_generation: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the push channel for `node_id`, replacing any existing one.
    pub(crate) fn connect(&self, shared: &Arc<Shared>, node_id: &str, endpoint: &str, client_id: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        // Spawn under the lock so the task cannot forget itself before it
        // is registered.
        let mut conns = self.lock();
        let handle = tokio::spawn(run_push_channel(
            Arc::clone(shared),
            PushTarget {
                node_id: node_id.to_string(),
                endpoint: endpoint.to_string(),
                client_id: client_id.to_string(),
                generation,
            },
            cancel.clone(),
        ));
        let previous = conns.insert(
            node_id.to_string(),
            Connection {
                generation,
                client_id: client_id.to_string(),
                cancel,
                _handle: handle,
            },
        );
        drop(conns);
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        tracing::debug!(node_id, client_id, endpoint, "Push channel opened");
    }

    /// Close the channel for `node_id`. Closing an absent channel is a no-op.
    pub fn disconnect(&self, node_id: &str) -> bool {
        let removed = self.lock().remove(node_id);
        match removed {
            Some(conn) => {
                conn.cancel.cancel();
                tracing::debug!(node_id, client_id = %conn.client_id, "Push channel closed");
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<Connection> = self.lock().drain().map(|(_, conn)| conn).collect();
        for conn in &drained {
            conn.cancel.cancel();
        }
        drained.len()
    }

    pub fn connected_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.lock().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Drop the map entry for a task that ended on its own, unless a newer
    /// connection already replaced it.
    fn forget(&self, node_id: &str, generation: u64) {
        let mut conns = self.lock();
        if conns.get(node_id).is_some_and(|c| c.generation == generation) {
            conns.remove(node_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct PushTarget {
    node_id: NodeId,
    endpoint: String,
    client_id: String,
    generation: u64,
}

async fn run_push_channel(shared: Arc<Shared>, target: PushTarget, cancel: CancellationToken) {
    let PushTarget {
        node_id,
        endpoint,
        client_id,
        generation,
    } = target;
    let reconnect = shared.config.reconnect.clone();
    let mut delay = reconnect.initial_delay;

    while shared.pool.current_job(&node_id).is_some() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.backend.subscribe(&endpoint, &client_id) => match result {
                Ok(stream) => {
                    delay = reconnect.initial_delay;
                    if consume(&shared, &node_id, &endpoint, stream, &cancel).await {
                        break;
                    }
                    tracing::debug!(node_id = %node_id, "Push channel ended");
                }
                Err(e) => {
                    tracing::warn!(
                        node_id = %node_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Push channel connect failed",
                    );
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, &reconnect);
    }

    shared.tracker.forget(&node_id, generation);
}

/// Drain `stream` into the job state. Returns `true` when cancelled.
async fn consume(
    shared: &Arc<Shared>,
    node_id: &str,
    endpoint: &str,
    mut stream: BackendEventStream,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return true,
            event = stream.next() => event,
        };
        let Some(event) = event else {
            return false;
        };
        handle_event(shared, node_id, endpoint, event).await;
    }
}

/// Apply one push event to the job the node is currently running.
pub(crate) async fn handle_event(shared: &Arc<Shared>, node_id: &str, endpoint: &str, event: BackendEvent) {
    let Some((job_id, backend_job_id)) = current_attempt(shared, node_id) else {
        tracing::trace!(node_id, ?event, "Push event with no active job on node");
        return;
    };
    if event
        .backend_job_id()
        .is_some_and(|id| id != backend_job_id)
    {
        tracing::trace!(node_id, ?event, "Push event for another prompt");
        return;
    }
    let guard = TerminalGuard::running(node_id, &backend_job_id);

    match event {
        BackendEvent::Started { .. } => {
            shared.record_progress(job_id, &backend_job_id, 0);
        }
        BackendEvent::Progress { value, max, .. } => {
            shared.record_progress(job_id, &backend_job_id, percent(value, max));
        }
        BackendEvent::Finished { .. } => {
            match shared.backend.fetch_history(endpoint, &backend_job_id).await {
                Ok(outcome) => {
                    if shared
                        .settle_from_history(job_id, &guard, endpoint, outcome)
                        .is_none()
                    {
                        tracing::debug!(
                            job_id = %job_id,
                            backend_job_id = %backend_job_id,
                            "Finished signal not yet reflected in history, leaving to poll",
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        node_id,
                        error = %e,
                        "History fetch after finish failed, leaving to poll",
                    );
                }
            }
        }
        BackendEvent::ExecutionError { message, .. } => {
            shared.fail(job_id, &guard, &DispatchError::ExecutionError(message));
        }
    }
}

/// `(job, backend job id)` for the rendering job claimed on `node_id`.
fn current_attempt(shared: &Shared, node_id: &str) -> Option<(JobId, String)> {
    let job_id = shared.pool.current_job(node_id)?;
    let job = shared.store.get(job_id)?;
    if !job.is_active() || job.assigned_node.as_deref() != Some(node_id) {
        return None;
    }
    Some((job_id, job.backend_job_id?))
}

/// `value / max` as a percentage clamped to `0..=100`.
pub fn percent(value: u32, max: u32) -> u8 {
    if max == 0 {
        return 0;
    }
    let pct = (u64::from(value) * 100) / u64::from(max);
    pct.min(100) as u8
}
