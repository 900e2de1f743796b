//! Render job scheduling engine.
//!
//! [`Scheduler`] pairs queued jobs with free compute nodes, dispatches the
//! built workflow graphs through a [`RenderBackend`], tracks progress over
//! each node's push channel with a periodic history poll as backstop, and
//! applies the bounded retry policy to failures.
//!
//! [`RenderBackend`]: renderq_core::backend::RenderBackend

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod progress;
pub mod reconcile;
pub mod reconnect;
pub mod registry;
pub mod scheduler;
pub mod store;
mod transition;

pub use config::{ConfigError, SchedulerConfig};
pub use dispatcher::Dispatch;
pub use error::{DispatchError, EngineError};
pub use pool::{NodePoolManager, SyncReport};
pub use progress::ProgressTracker;
pub use reconcile::ReconcileReport;
pub use reconnect::ReconnectConfig;
pub use registry::{NodeSpec, StaticNodeRegistry};
pub use scheduler::Scheduler;
pub use store::{InMemoryJobStore, JobStore};
