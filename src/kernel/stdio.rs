//! Detach a worker's standard streams from the owner's terminal/pipes.

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};
use std::os::unix::io::RawFd;

const DISCARD_PATH: &str = "/dev/null";

/// How the standard streams were neutralised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDisposal {
    /// Pointed at the discard device
    Redirected,
    /// Discard device unavailable, streams closed outright
    Closed,
}

fn targets(keep_stdin: bool) -> Vec<RawFd> {
    let mut fds = Vec::with_capacity(3);
    if !keep_stdin {
        fds.push(libc::STDIN_FILENO);
    }
    fds.push(libc::STDOUT_FILENO);
    fds.push(libc::STDERR_FILENO);
    fds
}

/// Redirect stdin/stdout/stderr to the discard device, falling back to
/// closing them. `keep_stdin` leaves fd 0 alone when it is the image source.
pub fn detach_standard_streams(keep_stdin: bool) -> StreamDisposal {
    let fds = targets(keep_stdin);

    let discard = match open(DISCARD_PATH, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            log::warn!("Cannot open {}: {}; closing standard streams", DISCARD_PATH, e);
            for fd in fds {
                let _ = close(fd);
            }
            return StreamDisposal::Closed;
        }
    };

    for fd in &fds {
        if *fd != discard {
            if let Err(e) = dup2(discard, *fd) {
                log::warn!("dup2({} -> {}) failed: {}; closing it", DISCARD_PATH, fd, e);
                let _ = close(*fd);
            }
        }
    }

    if discard > libc::STDERR_FILENO {
        let _ = close(discard);
    }
    StreamDisposal::Redirected
}
