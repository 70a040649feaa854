//! Resetter: forced cancellation and return to the initial state.

use crate::config::types::{ImgboxError, Result};
use crate::exec::job::ImageJob;
use crate::exec::poller::try_wait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::thread;
use std::time::{Duration, Instant};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// SIGKILL `pid` and wait for it, giving up after `timeout`.
///
/// This is the only blocking path in the crate. The wait is bounded by
/// process teardown, not by decode time, but a worker stuck in
/// uninterruptible sleep could outlast it; in that case the pid is
/// abandoned and `ReapTimeout` is returned.
pub(crate) fn terminate_and_reap(pid: Pid, timeout: Duration) -> Result<()> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("kill({}, SIGKILL) failed: {}", pid, e),
    }

    let start = Instant::now();
    loop {
        match try_wait(pid) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => return Ok(()),
            Err(Errno::ECHILD) => return Ok(()),
            Err(e) => return Err(ImgboxError::LivenessCheck(format!("waitpid({}): {}", pid, e))),
        }

        if start.elapsed() >= timeout {
            return Err(ImgboxError::ReapTimeout {
                pid: pid.as_raw(),
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        thread::sleep(REAP_POLL_INTERVAL);
    }
}

/// Return `job` to its freshly-created state.
///
/// The job is reset even when the reap fails; the error only reports that
/// a worker may have been left behind.
pub(crate) fn reset_job(job: &mut ImageJob) -> Result<()> {
    let mut outcome = Ok(());

    if let Some(pid) = job.worker.take() {
        log::warn!("Job {}: terminating live worker {}", job.id(), pid);
        outcome = terminate_and_reap(pid, job.reap_timeout);
        if let Err(e) = &outcome {
            log::error!("Job {}: {}", job.id(), e);
        }
    }

    job.broken = false;
    if let Some(region) = job.region.take() {
        log::debug!("Job {}: releasing region of {} bytes", job.id(), region.capacity());
        drop(region);
    }
    job.source = None;

    outcome
}
