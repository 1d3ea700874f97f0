//! CLI command implementations.

pub mod demo;
pub mod digest;
pub mod ssh;
