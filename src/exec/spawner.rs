//! Spawner: allocate the result region and fork the decode worker.
//!
//! The owner branch returns as soon as the worker exists. The worker branch
//! never returns: it hardens itself, decodes, publishes into the region and
//! leaves through `_exit`, so none of the owner's destructors or exit hooks
//! run in the copy.

use crate::config::loader::LoaderConfig;
use crate::config::types::{ImgboxError, Result, SourceRef, WorkerExit};
use crate::decode::Decoder;
use crate::exec::hardening::{Forked, WorkerSandbox};
use crate::exec::job::ImageJob;
use crate::kernel::seccomp::ContainmentPolicy;
use crate::region::ResultRegion;
use crate::utils::transport::HostTransport;
use nix::unistd::{fork, ForkResult};
use std::panic::{self, AssertUnwindSafe};

/// Spawn a worker that decodes `source` with `decoder`
pub(crate) fn spawn_decode<D: Decoder + ?Sized>(
    job: &mut ImageJob,
    source: SourceRef,
    config: &LoaderConfig,
    decoder: &D,
) -> Result<()> {
    let worker_source = source.clone();
    spawn_with_body(job, source, config, |region, transport| {
        run_worker(region, &worker_source, config, decoder, transport)
    })
}

/// Fork a worker running `body` against a fresh region.
///
/// `body` runs only in the worker; its return value becomes the exit code.
pub(crate) fn spawn_with_body<F>(
    job: &mut ImageJob,
    source: SourceRef,
    config: &LoaderConfig,
    body: F,
) -> Result<()>
where
    F: FnOnce(&mut ResultRegion, Option<&mut dyn HostTransport>) -> WorkerExit,
{
    if let Some(pid) = job.worker {
        return Err(ImgboxError::WorkerActive(pid.as_raw()));
    }
    config.validate()?;

    // The previous region goes first so two full-size mappings never coexist.
    job.region = None;
    let capacity = config.capacity_bytes()?;
    let mut region = ResultRegion::allocate(capacity)?;

    // SAFETY: the child only runs the worker body and then `_exit`s; it never
    // returns into caller code.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let transport = match job.transport.as_mut() {
                Some(transport) => Some(transport.as_mut() as &mut dyn HostTransport),
                None => None,
            };
            let exit = panic::catch_unwind(AssertUnwindSafe(|| body(&mut region, transport)))
                .unwrap_or(WorkerExit::Decode);
            // SAFETY: _exit is async-signal-safe and skips atexit handlers
            // inherited from the owner.
            unsafe { libc::_exit(exit.code()) }
        }
        Ok(ForkResult::Parent { child }) => {
            log::info!(
                "Job {}: spawned worker pid={} for {} (region {} bytes, containment {})",
                job.id(),
                child,
                source,
                capacity,
                ContainmentPolicy::from_enabled(config.syscall_filter)
            );
            job.worker = Some(child);
            job.region = Some(region);
            job.source = Some(source);
            job.reap_timeout = config.reap_timeout();
            Ok(())
        }
        Err(e) => {
            drop(region);
            Err(ImgboxError::Spawn(format!("fork: {}", e)))
        }
    }
}

/// Worker branch: harden, decode, publish.
///
/// Nothing here may log once `contain` has succeeded.
fn run_worker<D: Decoder + ?Sized>(
    region: &mut ResultRegion,
    source: &SourceRef,
    config: &LoaderConfig,
    decoder: &D,
    transport: Option<&mut dyn HostTransport>,
) -> WorkerExit {
    let sandbox = match WorkerSandbox::<Forked>::new().open_source(source) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            log::debug!("Worker cannot open {}: {}", source, e);
            return WorkerExit::from(&e);
        }
    };

    let contained = sandbox
        .detach_streams()
        .sever_transport(transport)
        .drop_credentials(config.sandbox_uid, config.sandbox_gid)
        .apply_ceilings()
        .contain(ContainmentPolicy::from_enabled(config.syscall_filter));

    let mut sandbox = match contained {
        Ok(sandbox) => sandbox,
        Err(e) => return WorkerExit::from(&e),
    };

    let image = match sandbox.decode(decoder) {
        Ok(image) => image,
        Err(e) => return WorkerExit::from(&e),
    };

    match region.publish(image.width, image.height, &image.pixels) {
        Ok(()) => WorkerExit::Success,
        Err(e) => WorkerExit::from(&e),
    }
}
