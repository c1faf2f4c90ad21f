//! Shared protocol definitions for the Duet wire format.

pub mod api;
pub mod codec;
pub mod cursor;
pub mod event;
pub mod message;
pub mod user;
