//! Realtime channel

pub mod handler;
pub mod protocol;
