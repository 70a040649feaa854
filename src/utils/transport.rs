//! Teardown of the enclosing application's IPC handles inside a worker.
//!
//! A worker is a copy of its owner, so it inherits whatever connection the
//! owner keeps to its host (shared mappings, socket or pipe descriptors).
//! The worker severs them before any untrusted code runs, so an exploited
//! decoder cannot reuse them even if a syscall path were left open.

use nix::errno::Errno;
use nix::sys::mman::munmap;
use nix::unistd::close;
use std::ffi::c_void;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

/// A host connection that can be torn down from inside a worker
pub trait HostTransport {
    /// Invalidate every handle belonging to the connection. Called once, in
    /// the worker only, and must not fail: anything that cannot be released
    /// is skipped.
    fn sever(&mut self);
}

/// Connection made of inherited descriptors and shared mappings.
///
/// Holds handles only; nothing is released on drop. The owner's copy stays
/// usable, only the worker's copy is severed.
#[derive(Debug, Default)]
pub struct InheritedConnection {
    descriptors: Vec<RawFd>,
    mappings: Vec<(NonNull<c_void>, usize)>,
}

impl InheritedConnection {
    pub fn new(descriptors: Vec<RawFd>) -> Self {
        Self {
            descriptors,
            mappings: Vec::new(),
        }
    }

    /// Add a shared mapping of `len` bytes at `addr` to be unmapped on sever.
    ///
    /// # Safety
    /// `addr..addr + len` must be a live mapping belonging to the connection,
    /// and nothing in the worker may touch it after `sever`.
    pub unsafe fn with_mapping(mut self, addr: NonNull<c_void>, len: usize) -> Self {
        self.mappings.push((addr, len));
        self
    }

    pub fn descriptors(&self) -> &[RawFd] {
        &self.descriptors
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }
}

impl HostTransport for InheritedConnection {
    fn sever(&mut self) {
        let mut unmapped = 0;
        for (addr, len) in self.mappings.drain(..) {
            // SAFETY: guaranteed live and unused afterwards by `with_mapping`.
            match unsafe { munmap(addr, len) } {
                Ok(()) => unmapped += 1,
                Err(e) => log::warn!("Failed to unmap host mapping {:p} ({} bytes): {}", addr, len, e),
            }
        }

        let mut closed = 0;
        for fd in self.descriptors.drain(..) {
            match close(fd) {
                Ok(()) => closed += 1,
                Err(Errno::EBADF) => {}
                Err(e) => log::warn!("Failed to close host descriptor {}: {}", fd, e),
            }
        }
        log::debug!(
            "Severed host transport ({} mappings unmapped, {} descriptors closed)",
            unmapped,
            closed
        );
    }
}
