//! Hard resource ceilings for decode workers.
//!
//! Every limit is set to zero for both soft and hard values, which cannot be
//! raised again without privileges. Already-open descriptors and the shared
//! result mapping are unaffected.

use crate::config::types::{ImgboxError, Result};

/// One ceiling applied to the worker
#[derive(Debug, Clone, Copy)]
pub struct Ceiling {
    pub name: &'static str,
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    resource: libc::__rlimit_resource_t,
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    resource: libc::c_int,
    pub value: u64,
}

/// No core dumps, no file growth, no new descriptors, no child processes
pub fn worker_ceilings() -> [Ceiling; 4] {
    [
        Ceiling { name: "RLIMIT_CORE", resource: libc::RLIMIT_CORE, value: 0 },
        Ceiling { name: "RLIMIT_FSIZE", resource: libc::RLIMIT_FSIZE, value: 0 },
        Ceiling { name: "RLIMIT_NOFILE", resource: libc::RLIMIT_NOFILE, value: 0 },
        Ceiling { name: "RLIMIT_NPROC", resource: libc::RLIMIT_NPROC, value: 0 },
    ]
}

fn apply_ceiling(ceiling: &Ceiling) -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: ceiling.value as libc::rlim_t,
        rlim_max: ceiling.value as libc::rlim_t,
    };

    // SAFETY: valid resource constant and a fully initialised rlimit.
    let rc = unsafe { libc::setrlimit(ceiling.resource, &limit) };
    if rc == 0 {
        return Ok(());
    }

    Err(ImgboxError::Io(std::io::Error::last_os_error()))
}

/// Apply all worker ceilings. Returns how many were applied; failures are
/// logged and skipped so one unsupported limit does not stop the rest.
pub fn apply_worker_ceilings() -> usize {
    let mut applied = 0;
    for ceiling in worker_ceilings().iter() {
        match apply_ceiling(ceiling) {
            Ok(()) => applied += 1,
            Err(e) => log::warn!("Failed to apply {}={}: {}", ceiling.name, ceiling.value, e),
        }
    }
    log::debug!("Applied {} resource ceilings", applied);
    applied
}

/// Read the current (soft, hard) pair for a ceiling
pub fn current_limit(ceiling: &Ceiling) -> Result<(u64, u64)> {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: limit is a valid out-pointer.
    let rc = unsafe { libc::getrlimit(ceiling.resource, &mut limit) };
    if rc != 0 {
        return Err(ImgboxError::Io(std::io::Error::last_os_error()));
    }
    Ok((limit.rlim_cur as u64, limit.rlim_max as u64))
}
