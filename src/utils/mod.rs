//! Utilities
//!
//! Host transport teardown used by the worker hardening chain.

pub mod transport;
