//! Configuration and shared types
//!
//! Error taxonomy, source references, worker exit codes, and the loader
//! configuration handed to every spawn.

pub mod loader;
pub mod types;
