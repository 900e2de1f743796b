//! ComfyUI transport for the render scheduler.
//!
//! Typed WebSocket message parsing, the REST API wrapper, history
//! parsing and [`ComfyUIBackend`], the [`RenderBackend`] implementation
//! the engine dispatches through.
//!
//! [`RenderBackend`]: renderq_core::backend::RenderBackend

pub mod api;
pub mod backend;
pub mod client;
pub mod history;
pub mod messages;

pub use backend::ComfyUIBackend;
