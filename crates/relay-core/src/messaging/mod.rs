//! Outbound payloads and session decorators.

pub mod bounded;
pub mod types;
