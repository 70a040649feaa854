//! imgbox: sandboxed asynchronous image decoding
//!
//! Decodes untrusted image files in a forked, hardened worker that writes the
//! result into a shared memory region. The owner never blocks on decode time.
//!
//! # Architecture
//!
//! ## Jobs ([`exec`])
//! - [`exec::job`]: `ImageJob`, the spawn / poll / reset state machine
//! - [`exec::hardening`]: Type-state enforced worker hardening order
//!
//! ## Result Region ([`region`])
//! - [`region::layout`]: Header layout and page release arithmetic
//! - [`region::ResultRegion`]: Anonymous shared mapping between owner and worker
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::seccomp`]: Syscall allow-list for the decode phase
//! - [`kernel::rlimit`]: Zeroed resource ceilings
//! - [`kernel::credentials`]: Best-effort drop to an unprivileged identity
//! - [`kernel::stdio`]: Standard stream redirection
//!
//! ## Decoding ([`decode`])
//! - [`decode::Decoder`]: The seam between the worker and an image library
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: Loader configuration and validation
//! - [`config::types`]: Source references, exit codes and errors
//!
//! ## Utilities ([`utils`])
//! - [`utils::transport`]: Host connection severing in the worker
//!
//! # Design Principles
//!
//! 1. **Owner never blocks** - Only `reset` waits, and only for a killed worker
//! 2. **Worker is hostile** - Nothing it writes is trusted beyond bounds checks
//! 3. **Types fix the order** - Hardening steps cannot be skipped or reordered
//! 4. **Minimal unsafe** - `fork`, `mmap` and `_exit` behind thin wrappers

// Kernel Primitives
pub mod kernel;

// Jobs
pub mod exec;

// Result Region
pub mod region;

// Decoding
pub mod decode;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the imgbox binary.
pub mod cli;

pub use config::loader::LoaderConfig;
pub use config::types::{ImgboxError, Result, SourceRef, WorkerExit};
pub use exec::job::{DecodedView, ImageJob};
