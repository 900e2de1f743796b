//! Long-running background tasks owned by the API process.

pub mod event_forwarder;

pub use event_forwarder::EventForwarder;
