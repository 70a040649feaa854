//! Execution control
//!
//! Drives a decode job through spawn, poll and reset, with the worker side
//! hardened by a type-state chain.

pub mod hardening;
pub mod job;
pub(crate) mod poller;
pub(crate) mod reset;
pub(crate) mod spawner;
