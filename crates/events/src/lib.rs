//! Scheduler event bus.
//!
//! [`EventBus`] is an in-process publish/subscribe hub backed by
//! `tokio::sync::broadcast`. The engine publishes a [`SchedulerEvent`] for
//! every job mutation; the API layer forwards them to WebSocket clients.

pub mod bus;

pub use bus::{EventBus, SchedulerEvent};
