//! Poller: non-blocking completion check for a job's worker.

use crate::config::types::WorkerExit;
use crate::exec::job::ImageJob;
use crate::region::page_size;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Non-blocking waitpid, retried across EINTR
pub(crate) fn try_wait(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Advance `job` if its worker has terminated. Returns `true` once nothing
/// is outstanding, including for a job that was never spawned.
pub(crate) fn poll_job(job: &mut ImageJob) -> bool {
    let Some(pid) = job.worker else {
        return true;
    };
    if job.region.is_none() {
        return true;
    }

    let status = match try_wait(pid) {
        Ok(WaitStatus::StillAlive) => return false,
        Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => status,
        Ok(other) => {
            log::debug!("Job {}: worker {} reported {:?}; still running", job.id(), pid, other);
            return false;
        }
        Err(e) => {
            // The handle is no longer ours to signal or wait on.
            log::error!("Job {}: liveness check for worker {} failed: {}", job.id(), pid, e);
            job.worker = None;
            job.broken = true;
            return true;
        }
    };

    job.worker = None;

    let Some(region) = job.region.as_mut() else {
        job.broken = true;
        return true;
    };

    let claimed = region.claimed_len();
    let available = region.payload_capacity();
    if claimed > available {
        log::warn!(
            "Job {}: worker {} claimed {} bytes with only {} available; discarding region",
            job.id(),
            pid,
            claimed,
            available
        );
        job.region = None;
        job.broken = true;
        return true;
    }

    let success = matches!(status, WaitStatus::Exited(_, code) if code == WorkerExit::Success.code());
    job.broken = !success;

    region.reset_origin();
    let released = region.release_unused(page_size());

    match status {
        WaitStatus::Exited(_, code) => log::info!(
            "Job {}: worker {} exited with {} ({:?}); broken={}, released {} bytes",
            job.id(),
            pid,
            code,
            WorkerExit::from_code(code),
            job.broken,
            released
        ),
        other => log::info!(
            "Job {}: worker {} terminated: {:?}; broken={}, released {} bytes",
            job.id(),
            pid,
            other,
            job.broken,
            released
        ),
    }
    true
}
