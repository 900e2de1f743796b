//! Request handlers, one module per resource.

pub mod jobs;
pub mod nodes;
pub mod scheduler;
pub mod workflows;
