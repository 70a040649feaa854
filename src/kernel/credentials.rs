//! Best-effort transition to the unprivileged worker identity.
//!
//! The drop is defense-in-depth: an unprivileged owner cannot change its
//! IDs and that is fine. Failures are logged and never abort the worker.
//! setresgid MUST run before setresuid, otherwise the group change is no
//! longer permitted.

/// Result of a credential transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialDrop {
    pub groups_cleared: bool,
    pub gid_set: bool,
    pub uid_set: bool,
}

impl CredentialDrop {
    pub fn complete(&self) -> bool {
        self.groups_cleared && self.gid_set && self.uid_set
    }
}

/// clear groups -> setresgid -> setresuid -> verify
pub fn drop_to_unprivileged(uid: u32, gid: u32) -> CredentialDrop {
    let groups_cleared = clear_supplementary_groups();
    let gid_set = set_gid(gid);
    let uid_set = set_uid(uid);

    let outcome = CredentialDrop { groups_cleared, gid_set, uid_set };
    if outcome.complete() && verify_transition(uid, gid) {
        log::debug!("Worker running as UID={}, GID={}", uid, gid);
    } else {
        log::warn!(
            "Credential drop to {}:{} incomplete (groups={}, gid={}, uid={}); continuing",
            uid, gid, groups_cleared, gid_set, uid_set
        );
    }
    outcome
}

fn clear_supplementary_groups() -> bool {
    #[cfg(target_os = "linux")]
    {
        match nix::unistd::setgroups(&[]) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("setgroups([]) failed: {}", e);
                false
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn set_gid(gid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: setresgid takes plain integers.
        let rc = unsafe { libc::setresgid(gid, gid, gid) };
        if rc != 0 {
            log::debug!("setresgid({}) failed: {}", gid, std::io::Error::last_os_error());
        }
        rc == 0
    }

    #[cfg(not(target_os = "linux"))]
    {
        nix::unistd::setgid(nix::unistd::Gid::from_raw(gid)).is_ok()
    }
}

/// MUST run after set_gid.
fn set_uid(uid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: setresuid takes plain integers.
        let rc = unsafe { libc::setresuid(uid, uid, uid) };
        if rc != 0 {
            log::debug!("setresuid({}) failed: {}", uid, std::io::Error::last_os_error());
        }
        rc == 0
    }

    #[cfg(not(target_os = "linux"))]
    {
        nix::unistd::setuid(nix::unistd::Uid::from_raw(uid)).is_ok()
    }
}

fn verify_transition(expected_uid: u32, expected_gid: u32) -> bool {
    use nix::unistd::{getegid, geteuid, getgid, getuid};

    getuid().as_raw() == expected_uid
        && geteuid().as_raw() == expected_uid
        && getgid().as_raw() == expected_gid
        && getegid().as_raw() == expected_gid
}
