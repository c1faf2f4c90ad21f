//! Duet server library.
//!
//! Hosts the delivery and presence core of a one-to-one chat service: the
//! message store, the presence registry, the status state machine, reaction
//! fan-out and paginated history, bound to HTTP and a WebSocket event
//! stream. Exposed as a library for tests and embedding.

pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod media;
pub mod presence;
pub mod reactions;
pub mod server;
pub mod state;
pub mod store;
pub mod users;
