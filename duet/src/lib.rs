//! Duet client library: optimistic local chat state kept in step with a
//! Duet server over HTTP and a WebSocket event stream.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod session;
pub mod view;
