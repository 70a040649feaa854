// Syscall containment for decode workers.
// Defense-in-depth only: the worker's correctness never depends on it, and
// it can be disabled through `LoaderConfig::syscall_filter` on hosts that
// lack seccomp.

use crate::config::types::{ImgboxError, Result};

/// Containment policy requested for a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainmentPolicy {
    /// No filter; the worker keeps its full syscall surface
    Disabled,
    /// Default-deny filter, only `ALLOWED_OPERATIONS` survive
    AllowList,
}

impl ContainmentPolicy {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            ContainmentPolicy::AllowList
        } else {
            ContainmentPolicy::Disabled
        }
    }
}

impl std::fmt::Display for ContainmentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainmentPolicy::Disabled => write!(f, "disabled"),
            ContainmentPolicy::AllowList => write!(f, "allow_list"),
        }
    }
}

/// What `apply_containment` actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainmentOutcome {
    Skipped,
    Applied { allowed_syscalls: usize },
    /// Policy requested on a platform without an equivalent mechanism
    Unsupported,
}

/// Classes of operation the decode path needs after containment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedOperation {
    MapMemory,
    HeapGrowth,
    Terminate,
    FileStatus,
    Read,
    Seek,
}

/// Allow-list, grouped by operation class. Everything else kills the process.
///
/// Heap growth covers `brk` for the main arena plus `mprotect`/`mremap`/
/// `madvise`, which glibc uses for secondary arenas and large reallocations.
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const ALLOWED_OPERATIONS: &[(AllowedOperation, &str, libc::c_long)] = &[
    (AllowedOperation::MapMemory, "mmap", libc::SYS_mmap),
    (AllowedOperation::MapMemory, "munmap", libc::SYS_munmap),
    (AllowedOperation::HeapGrowth, "brk", libc::SYS_brk),
    (AllowedOperation::HeapGrowth, "mremap", libc::SYS_mremap),
    (AllowedOperation::HeapGrowth, "mprotect", libc::SYS_mprotect),
    (AllowedOperation::HeapGrowth, "madvise", libc::SYS_madvise),
    (AllowedOperation::Terminate, "exit", libc::SYS_exit),
    (AllowedOperation::Terminate, "exit_group", libc::SYS_exit_group),
    (AllowedOperation::FileStatus, "fstat", libc::SYS_fstat),
    (AllowedOperation::FileStatus, "newfstatat", libc::SYS_newfstatat),
    (AllowedOperation::Read, "read", libc::SYS_read),
    (AllowedOperation::Seek, "lseek", libc::SYS_lseek),
];

/// Names of the syscalls the allow-list admits
pub fn allowed_syscall_names() -> Vec<&'static str> {
    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        ALLOWED_OPERATIONS.iter().map(|(_, name, _)| *name).collect()
    }

    #[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
    {
        Vec::new()
    }
}

/// Install the containment policy on the calling process.
///
/// Irreversible. Must run after every other hardening step, and nothing may
/// log afterwards: `write` is not on the list.
pub fn apply_containment(policy: ContainmentPolicy) -> Result<ContainmentOutcome> {
    if policy == ContainmentPolicy::Disabled {
        log::debug!("Syscall containment disabled by configuration");
        return Ok(ContainmentOutcome::Skipped);
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        install_allow_list()
    }

    #[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
    {
        log::warn!("Syscall containment unsupported on this platform; continuing without it");
        Ok(ContainmentOutcome::Unsupported)
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
fn install_allow_list() -> Result<ContainmentOutcome> {
    use seccompiler::{BackendError, BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
    use std::collections::BTreeMap;

    let arch: TargetArch = std::env::consts::ARCH
        .try_into()
        .map_err(|e: BackendError| ImgboxError::Containment(format!("unsupported arch: {e}")))?;

    // Empty rule vectors match the syscall unconditionally.
    let rules: BTreeMap<i64, Vec<SeccompRule>> = ALLOWED_OPERATIONS
        .iter()
        .map(|(_, _, nr)| (*nr as i64, Vec::new()))
        .collect();
    let allowed_syscalls = rules.len();

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::KillProcess, // anything not listed
        SeccompAction::Allow,       // listed syscalls
        arch,
    )
    .map_err(|e| ImgboxError::Containment(format!("failed to build filter: {e}")))?;

    let program: BpfProgram = filter
        .try_into()
        .map_err(|e: BackendError| ImgboxError::Containment(format!("failed to compile filter: {e}")))?;

    // SAFETY: prctl with constant integer arguments.
    unsafe {
        libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0);
        libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
    }

    log::debug!("Installing syscall allow-list ({} syscalls)", allowed_syscalls);
    seccompiler::apply_filter(&program)
        .map_err(|e| ImgboxError::Containment(format!("failed to install filter: {e}")))?;

    Ok(ContainmentOutcome::Applied { allowed_syscalls })
}

/// Check whether this host can install the allow-list
pub fn is_containment_supported() -> bool {
    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        std::fs::read_to_string("/proc/self/status")
            .map(|status| status.lines().any(|line| line.starts_with("Seccomp:")))
            .unwrap_or(false)
    }

    #[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
    {
        false
    }
}

/// Containment support status for capability reporting
pub fn containment_status() -> String {
    if is_containment_supported() {
        "available".to_string()
    } else {
        "unavailable".to_string()
    }
}
