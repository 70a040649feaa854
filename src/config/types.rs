/// Core types shared by the owner and worker sides of imgbox
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Where a worker reads its encoded image from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRef {
    /// Named file, opened inside the worker before hardening
    Path(PathBuf),
    /// The standard input stream inherited from the owner
    Stdin,
}

impl SourceRef {
    /// Parse a CLI-style source argument, where `-` selects stdin
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            SourceRef::Stdin
        } else {
            SourceRef::Path(PathBuf::from(arg))
        }
    }

    pub fn is_stdin(&self) -> bool {
        matches!(self, SourceRef::Stdin)
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Path(path) => write!(f, "{}", path.display()),
            SourceRef::Stdin => write!(f, "<stdin>"),
        }
    }
}

/// Exit codes a worker terminates with.
///
/// The owner only distinguishes `Success` from everything else; the
/// remaining codes exist so a failing worker can be diagnosed from logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    SourceOpen,
    Decode,
    Publish,
    Containment,
}

impl WorkerExit {
    pub fn code(self) -> i32 {
        match self {
            WorkerExit::Success => 0,
            WorkerExit::SourceOpen => 1,
            WorkerExit::Decode => 2,
            WorkerExit::Publish => 3,
            WorkerExit::Containment => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(WorkerExit::Success),
            1 => Some(WorkerExit::SourceOpen),
            2 => Some(WorkerExit::Decode),
            3 => Some(WorkerExit::Publish),
            4 => Some(WorkerExit::Containment),
            _ => None,
        }
    }
}

impl From<&ImgboxError> for WorkerExit {
    fn from(err: &ImgboxError) -> Self {
        match err {
            ImgboxError::SourceOpen(_) => WorkerExit::SourceOpen,
            ImgboxError::Oversize { .. } => WorkerExit::Publish,
            ImgboxError::Containment(_) => WorkerExit::Containment,
            _ => WorkerExit::Decode,
        }
    }
}

/// Error type for imgbox operations
#[derive(Error, Debug)]
pub enum ImgboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Result region allocation failed: {0}")]
    Allocation(String),

    #[error("Worker spawn failed: {0}")]
    Spawn(String),

    #[error("Job already has a live worker (pid {0}); reset it first")]
    WorkerActive(i32),

    #[error("Cannot open image source: {0}")]
    SourceOpen(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Result of {claimed} bytes exceeds region payload of {available} bytes")]
    Oversize { claimed: usize, available: usize },

    #[error("Worker liveness check failed: {0}")]
    LivenessCheck(String),

    #[error("Worker {pid} was not reaped within {waited_ms} ms of SIGKILL")]
    ReapTimeout { pid: i32, waited_ms: u64 },

    #[error("Containment policy error: {0}")]
    Containment(String),
}

impl From<nix::errno::Errno> for ImgboxError {
    fn from(err: nix::errno::Errno) -> Self {
        ImgboxError::Io(std::io::Error::from(err))
    }
}

/// Result type alias for imgbox operations
pub type Result<T> = std::result::Result<T, ImgboxError>;
