//! Shared error taxonomy.
//!
//! Every subsystem error converts into [`MeshError`], which in turn carries
//! the category tag a wire response reports back to the caller.

use thiserror::Error;

/// Error category, reported alongside the message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Policy,
    Capacity,
    Runtime,
    Timeout,
    Transport,
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Policy => "POLICY",
            ErrorCategory::Capacity => "CAPACITY",
            ErrorCategory::Runtime => "RUNTIME",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Transport => "TRANSPORT",
            ErrorCategory::Fatal => "FATAL",
        }
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("unknown file: {0}")]
    UnknownFile(String),
    #[error("unknown pid: {0}")]
    UnknownPid(u64),
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("not owner")]
    NotOwner,
    #[error("cancelled")]
    Cancelled,

    #[error("exceeds declared need")]
    ExceedsNeed,
    #[error("exceeds available units")]
    ExceedsAvailable,
    #[error("allocation would be unsafe")]
    Unsafe,
    #[error("out of memory")]
    OutOfMemory,

    #[error("task failed: {0}")]
    TaskFailed(String),
    #[error("timed out")]
    TimedOut,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no peer available")]
    NoPeerAvailable,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MeshError {
    pub fn category(&self) -> ErrorCategory {
        use MeshError::*;
        match self {
            BadRequest(_) | UnknownKey(_) | UnknownFile(_) | UnknownPid(_) | UnknownResource(_) => {
                ErrorCategory::Input
            }
            QuotaExceeded | NotOwner | Cancelled => ErrorCategory::Policy,
            ExceedsNeed | ExceedsAvailable | Unsafe | OutOfMemory => ErrorCategory::Capacity,
            TaskFailed(_) => ErrorCategory::Runtime,
            TimedOut => ErrorCategory::Timeout,
            Transport(_) | NoPeerAvailable => ErrorCategory::Transport,
            Io(_) | Serde(_) => ErrorCategory::Fatal,
        }
    }

    /// Stable machine-readable tag used on the wire.
    pub fn code(&self) -> &'static str {
        use MeshError::*;
        match self {
            BadRequest(_) => "BAD_REQUEST",
            UnknownKey(_) => "UNKNOWN_KEY",
            UnknownFile(_) => "UNKNOWN_FILE",
            UnknownPid(_) => "UNKNOWN_PID",
            UnknownResource(_) => "UNKNOWN_RESOURCE",
            QuotaExceeded => "QUOTA_EXCEEDED",
            NotOwner => "NOT_OWNER",
            Cancelled => "CANCELLED",
            ExceedsNeed => "EXCEEDS_NEED",
            ExceedsAvailable => "EXCEEDS_AVAILABLE",
            Unsafe => "UNSAFE",
            OutOfMemory => "OUT_OF_MEMORY",
            TaskFailed(_) => "TASK_FAILED",
            TimedOut => "TIMED_OUT",
            Transport(_) => "TRANSPORT_ERROR",
            NoPeerAvailable => "NO_PEER_AVAILABLE",
            Io(_) => "IO_ERROR",
            Serde(_) => "SERDE_ERROR",
        }
    }
}

pub type MeshResult<T> = Result<T, MeshError>;
