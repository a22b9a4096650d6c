//! Shared utilities

pub mod rate_limit;
pub mod subscription;
pub mod time;
