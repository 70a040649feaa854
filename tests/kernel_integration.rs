//! Integration tests for kernel module
//!
//! Each hardening primitive is irreversible, so every test applies it in a
//! forked child and inspects the child's wait status.

use imgbox::kernel::credentials::drop_to_unprivileged;
use imgbox::kernel::rlimit::{apply_worker_ceilings, worker_ceilings};
use imgbox::kernel::seccomp::{apply_containment, is_containment_supported, ContainmentPolicy};
use imgbox::kernel::stdio::detach_standard_streams;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

/// Run `body` in a forked child; its return value is the exit code.
fn in_child<F: FnOnce() -> i32>(body: F) -> WaitStatus {
    match unsafe { fork() }.expect("fork failed") {
        ForkResult::Child => {
            let code = body();
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => waitpid(child, None).expect("waitpid failed"),
    }
}

#[test]
fn test_unlisted_syscall_kills_contained_process() {
    if !is_containment_supported() {
        println!("Skipping: syscall containment not supported");
        return;
    }

    let status = in_child(|| {
        if apply_containment(ContainmentPolicy::AllowList).is_err() {
            return 3;
        }
        // Not on the allow-list.
        unsafe { libc::syscall(libc::SYS_getppid) };
        0
    });

    assert!(
        matches!(status, WaitStatus::Signaled(_, Signal::SIGSYS, _)),
        "expected SIGSYS, got {:?}",
        status
    );
}

#[test]
fn test_contained_process_can_allocate_and_exit() {
    if !is_containment_supported() {
        println!("Skipping: syscall containment not supported");
        return;
    }

    let status = in_child(|| {
        if apply_containment(ContainmentPolicy::AllowList).is_err() {
            return 3;
        }
        let buffer = vec![7u8; 8 * 1024 * 1024];
        if buffer.iter().all(|b| *b == 7) {
            0
        } else {
            1
        }
    });

    assert_eq!(status, WaitStatus::Exited(status_pid(&status), 0));
}

#[test]
fn test_disabled_containment_leaves_syscalls_alone() {
    let status = in_child(|| {
        if apply_containment(ContainmentPolicy::Disabled).is_err() {
            return 3;
        }
        unsafe { libc::syscall(libc::SYS_getppid) };
        0
    });

    assert_eq!(status, WaitStatus::Exited(status_pid(&status), 0));
}

#[test]
fn test_ceilings_block_new_descriptors() {
    let status = in_child(|| {
        apply_worker_ceilings();
        match std::fs::File::open("/dev/null") {
            Ok(_) => 1,
            Err(_) => 0,
        }
    });

    assert_eq!(status, WaitStatus::Exited(status_pid(&status), 0));
}

#[test]
fn test_ceilings_cannot_be_raised_again() {
    let status = in_child(|| {
        if apply_worker_ceilings() != worker_ceilings().len() {
            return 2;
        }
        let raised = libc::rlimit { rlim_cur: 1024, rlim_max: 1024 };
        let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raised) };
        // Root may raise hard limits; everyone else must be refused.
        let privileged = unsafe { libc::geteuid() } == 0;
        if rc != 0 || privileged {
            0
        } else {
            1
        }
    });

    assert_eq!(status, WaitStatus::Exited(status_pid(&status), 0));
}

#[test]
fn test_standard_streams_point_at_discard_device() {
    let status = in_child(|| {
        detach_standard_streams(false);
        let targets = ["/proc/self/fd/0", "/proc/self/fd/1", "/proc/self/fd/2"];
        let all_discard = targets.iter().all(|link| {
            std::fs::read_link(link)
                .map(|path| path == std::path::Path::new("/dev/null"))
                .unwrap_or(false)
        });
        if all_discard {
            0
        } else {
            1
        }
    });

    assert_eq!(status, WaitStatus::Exited(status_pid(&status), 0));
}

#[test]
fn test_credential_drop_never_aborts() {
    let status = in_child(|| {
        let outcome = drop_to_unprivileged(65534, 65534);
        let is_root = unsafe { libc::geteuid() } == 0;
        if outcome.complete() {
            // Only a privileged process can complete the drop.
            if unsafe { libc::getuid() } == 65534 {
                0
            } else {
                1
            }
        } else if is_root {
            2
        } else {
            0
        }
    });

    match status {
        WaitStatus::Exited(_, 0) => {}
        WaitStatus::Exited(_, 2) => {
            println!("Credential drop incomplete despite euid 0 (restricted container)")
        }
        other => panic!("unexpected status {:?}", other),
    }
}

fn status_pid(status: &WaitStatus) -> nix::unistd::Pid {
    status.pid().expect("terminal status carries a pid")
}
