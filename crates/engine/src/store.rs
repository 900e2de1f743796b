//! Authoritative job collection.
//!
//! All mutation of an existing job goes through [`JobStore::update`], a
//! compare-and-set: the closure sees the current record under the store
//! lock and decides whether to change it. Callers that race (push handler,
//! poll pass, dispatch task) therefore never overwrite each other.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use renderq_core::job::{JobStatus, RenderJob};
use renderq_core::types::JobId;

pub trait JobStore: Send + Sync {
    fn insert(&self, job: RenderJob);

    fn get(&self, id: JobId) -> Option<RenderJob>;

    /// All jobs in submission order.
    fn list(&self) -> Vec<RenderJob>;

    fn list_by_status(&self, status: JobStatus) -> Vec<RenderJob> {
        self.list().into_iter().filter(|j| j.status == status).collect()
    }

    /// Jobs in `assigned` or `rendering`.
    fn list_active(&self) -> Vec<RenderJob> {
        self.list().into_iter().filter(RenderJob::is_active).collect()
    }

    fn remove(&self, id: JobId) -> Option<RenderJob>;

    /// Delete every job for which `keep` returns false. Returns the removed jobs.
    fn retain(&self, keep: &mut dyn FnMut(&RenderJob) -> bool) -> Vec<RenderJob>;

    /// Compare-and-set. `apply` mutates the job in place and returns `true`
    /// to commit; returning `false` leaves the stored job untouched. Yields
    /// the committed job, or `None` when the job is missing or `apply`
    /// declined.
    fn update(&self, id: JobId, apply: &mut dyn FnMut(&mut RenderJob) -> bool) -> Option<RenderJob>;
}

/// Process-local [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, RenderJob>,
    /// Insertion order, for stable listings.
    order: Vec<JobId>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: RenderJob) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.jobs.insert(job.id, job.clone()).is_none() {
            inner.order.push(job.id);
        }
    }

    fn get(&self, id: JobId) -> Option<RenderJob> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.jobs.get(&id).cloned()
    }

    fn list(&self) -> Vec<RenderJob> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    fn remove(&self, id: JobId) -> Option<RenderJob> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.jobs.remove(&id)?;
        inner.order.retain(|o| *o != id);
        Some(removed)
    }

    fn retain(&self, keep: &mut dyn FnMut(&RenderJob) -> bool) -> Vec<RenderJob> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Inner { jobs, order } = &mut *inner;
        let mut removed = Vec::new();
        order.retain(|id| match jobs.get(id) {
            Some(job) if !keep(job) => {
                if let Some(job) = jobs.remove(id) {
                    removed.push(job);
                }
                false
            }
            Some(_) => true,
            None => false,
        });
        removed
    }

    fn update(&self, id: JobId, apply: &mut dyn FnMut(&mut RenderJob) -> bool) -> Option<RenderJob> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let stored = inner.jobs.get_mut(&id)?;
        let mut candidate = stored.clone();
        if !apply(&mut candidate) {
            return None;
        }
        *stored = candidate.clone();
        Some(candidate)
    }
}
