//! Worker hardening chain
//!
//! The sequence is FIXED and runs inside the worker before any decoder code:
//! 1. open the source (fatal on failure)
//! 2. redirect standard streams to the discard device
//! 3. sever the host transport
//! 4. drop to the unprivileged identity (best-effort)
//! 5. apply resource ceilings
//! 6. install syscall containment (if enabled; fatal if it cannot be installed)
//! 7. decode
//!
//! Each step consumes the previous state, so steps cannot be skipped or
//! reordered. Only `WorkerSandbox<Contained>` can run a decoder:
//!
//! ```compile_fail
//! use imgbox::config::types::SourceRef;
//! use imgbox::decode::ImageCrateDecoder;
//! use imgbox::exec::hardening::{Forked, WorkerSandbox};
//!
//! let mut opened = WorkerSandbox::<Forked>::new()
//!     .open_source(&SourceRef::Stdin)
//!     .unwrap();
//! let _ = opened.decode(&ImageCrateDecoder);
//! ```
//!
//! Containment cannot be installed before the credential drop:
//!
//! ```compile_fail
//! use imgbox::config::types::SourceRef;
//! use imgbox::exec::hardening::{Forked, WorkerSandbox};
//! use imgbox::kernel::seccomp::ContainmentPolicy;
//!
//! let sandbox = WorkerSandbox::<Forked>::new()
//!     .open_source(&SourceRef::Stdin)
//!     .unwrap()
//!     .detach_streams();
//! let _ = sandbox.contain(ContainmentPolicy::AllowList);
//! ```
//!
//! The full chain, as a worker runs it:
//!
//! ```no_run
//! use imgbox::config::types::SourceRef;
//! use imgbox::decode::ImageCrateDecoder;
//! use imgbox::exec::hardening::{Forked, WorkerSandbox};
//! use imgbox::kernel::seccomp::ContainmentPolicy;
//!
//! let mut sandbox = WorkerSandbox::<Forked>::new()
//!     .open_source(&SourceRef::Path("in.png".into()))?
//!     .detach_streams()
//!     .sever_transport(None)
//!     .drop_credentials(65534, 65534)
//!     .apply_ceilings()
//!     .contain(ContainmentPolicy::AllowList)?;
//! let image = sandbox.decode(&ImageCrateDecoder)?;
//! # Ok::<(), imgbox::config::types::ImgboxError>(())
//! ```

use crate::config::types::{Result, SourceRef};
use crate::decode::{DecodedImage, Decoder, SourceStream};
use crate::kernel::credentials::drop_to_unprivileged;
use crate::kernel::rlimit::apply_worker_ceilings;
use crate::kernel::seccomp::{apply_containment, ContainmentOutcome, ContainmentPolicy};
use crate::kernel::stdio::detach_standard_streams;
use crate::utils::transport::HostTransport;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

/// Fresh worker branch, nothing applied yet
pub struct Forked;

/// Source opened
pub struct SourceOpened;

/// Standard streams point at the discard device
pub struct StreamsDetached;

/// Host transport handles invalidated
pub struct TransportSevered;

/// Credential drop attempted
pub struct CredsDropped;

/// Resource ceilings applied
pub struct Limited;

/// Containment installed (or disabled by configuration); decoder may run
pub struct Contained;

/// Worker process state tracked at the type level
pub struct WorkerSandbox<S> {
    /// Never closed explicitly: after containment `close` is fatal, so the
    /// worker exits while still holding it.
    stream: Option<ManuallyDrop<SourceStream>>,
    stdin_is_source: bool,
    _state: PhantomData<S>,
}

impl<S> WorkerSandbox<S> {
    fn advance<N>(self) -> WorkerSandbox<N> {
        WorkerSandbox {
            stream: self.stream,
            stdin_is_source: self.stdin_is_source,
            _state: PhantomData,
        }
    }
}

impl Default for WorkerSandbox<Forked> {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSandbox<Forked> {
    pub fn new() -> Self {
        Self {
            stream: None,
            stdin_is_source: false,
            _state: PhantomData,
        }
    }

    /// Step 1: open the image source
    pub fn open_source(self, source: &SourceRef) -> Result<WorkerSandbox<SourceOpened>> {
        let stream = SourceStream::open(source)?;
        log::debug!("Worker opened source {}", source);
        Ok(WorkerSandbox {
            stream: Some(ManuallyDrop::new(stream)),
            stdin_is_source: source.is_stdin(),
            _state: PhantomData,
        })
    }
}

impl WorkerSandbox<SourceOpened> {
    /// Step 2: redirect (or close) standard streams. Stdin stays when it is
    /// the source.
    pub fn detach_streams(self) -> WorkerSandbox<StreamsDetached> {
        let disposal = detach_standard_streams(self.stdin_is_source);
        log::debug!("Standard streams {:?}", disposal);
        self.advance()
    }
}

impl WorkerSandbox<StreamsDetached> {
    /// Step 3: tear down the enclosing application's connection
    pub fn sever_transport(
        self,
        transport: Option<&mut dyn HostTransport>,
    ) -> WorkerSandbox<TransportSevered> {
        if let Some(transport) = transport {
            transport.sever();
        }
        self.advance()
    }
}

impl WorkerSandbox<TransportSevered> {
    /// Step 4: best-effort drop to `uid`/`gid`
    pub fn drop_credentials(self, uid: u32, gid: u32) -> WorkerSandbox<CredsDropped> {
        let _ = drop_to_unprivileged(uid, gid);
        self.advance()
    }
}

impl WorkerSandbox<CredsDropped> {
    /// Step 5: zero core, file size, open file and process ceilings
    pub fn apply_ceilings(self) -> WorkerSandbox<Limited> {
        apply_worker_ceilings();
        self.advance()
    }
}

impl WorkerSandbox<Limited> {
    /// Step 6: install the syscall policy. Nothing may log after this.
    pub fn contain(self, policy: ContainmentPolicy) -> Result<WorkerSandbox<Contained>> {
        match apply_containment(policy)? {
            ContainmentOutcome::Unsupported => {
                log::warn!("Containment requested but unsupported; decoding uncontained")
            }
            ContainmentOutcome::Skipped | ContainmentOutcome::Applied { .. } => {}
        }
        Ok(self.advance())
    }
}

impl WorkerSandbox<Contained> {
    /// Step 7: run the decoder on the opened source
    pub fn decode<D: Decoder + ?Sized>(&mut self, decoder: &D) -> Result<DecodedImage> {
        match self.stream.as_deref_mut() {
            Some(stream) => decoder.decode(stream),
            None => Err(crate::config::types::ImgboxError::SourceOpen(
                "worker has no open source".to_string(),
            )),
        }
    }
}
