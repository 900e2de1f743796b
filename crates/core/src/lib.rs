//! Pure domain logic for the render job scheduler.
//!
//! This crate has no internal dependencies and performs no I/O so it can
//! be shared by the engine, the ComfyUI transport and the API layer.
//! The two external collaborator seams ([`node::NodeRegistry`] and
//! [`backend::RenderBackend`]) are declared here as traits.

pub mod backend;
pub mod error;
pub mod job;
pub mod node;
pub mod retry;
pub mod scheduling;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod fixtures;
