//! A crate to ensure that all engine crates use the same tracing/logging
//! infrastructure, pinned at a single version, without each crate pulling in
//! its own copy of `tracing`.
//!
//! Components should `use observability_deps::tracing::{debug, info, warn,
//! error};` rather than depending on `tracing` directly.

pub use tracing;
