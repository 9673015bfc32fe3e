//! CLI command implementations.

pub mod config;
pub mod meta;
pub mod store;
