//! HTTP and WebSocket surface of the render queue.
//!
//! Exposed as a library so the integration tests can build the same
//! router the binary serves.

pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
