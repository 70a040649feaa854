//! Thin wrappers around the kernel primitives a decode worker uses to
//! harden itself.
//!
//! All `unsafe` code outside the result region lives here.
//! Order of use inside a worker: stdio -> credentials -> rlimit -> seccomp

pub mod credentials;
pub mod rlimit;
pub mod seccomp;
pub mod stdio;
