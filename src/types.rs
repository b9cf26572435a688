//! Core types and data structures for the runlim process supervisor.
//!
//! This module defines the configuration, error, and classification types
//! shared across the proctable reader, registry, sampler, killer, and
//! supervisor.

use thiserror::Error;

/// Sampling cadence, in milliseconds. Matches the original `SAMPLE_RATE`.
pub const SAMPLE_RATE_MS: u64 = 10_000;

/// Number of sample ticks between periodic `sample` log reports.
pub const REPORT_RATE: u64 = 100;

/// Resource ceilings for the supervised subtree, fixed after startup.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// CPU-time ceiling over the subtree (summed user+system), in seconds.
    pub time_limit_s: u64,
    /// Wall-clock ceiling since launch, in seconds.
    pub real_time_limit_s: u64,
    /// Peak resident memory ceiling over the subtree, in megabytes.
    pub space_limit_mb: u64,
    /// Whether to re-raise the terminating OS signal after cleanup.
    pub propagate_signals: bool,
}

/// Kernel-exposed facts read once at startup.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub pid_max: i32,
    pub page_size_bytes: u64,
    pub clock_ticks_per_sec: u64,
    pub host_name: String,
}

/// Errors surfaced by the supervision core.
///
/// Configuration-time failures (read by `main`/`cli`) are fatal; sampling
/// failures are generally swallowed by their caller and retried next tick.
#[derive(Error, Debug)]
pub enum RunlimError {
    #[error("can not open directory '{0}'")]
    ProcDirUnavailable(String),

    #[error("can not open '{0}' for reading")]
    KernelFileUnavailable(String),

    #[error("failed to read maximum process id from '{0}'")]
    PidMaxUnreadable(String),

    #[error("tiny maximum process id '{0}' in '{1}'")]
    PidMaxTooSmall(i64, String),

    #[error("huge maximum process id '{0}' in '{1}'")]
    PidMaxTooLarge(i64, String),

    #[error("maximum process id '{0}' exceeds registry capacity '{1}'")]
    PidMaxExceedsCapacity(i64, i64),

    #[error("no program specified (try '-h')")]
    NoProgramSpecified,

    #[error("failed to spawn '{0}': {1}")]
    Spawn(String, std::io::Error),

    #[error("fork failed: {0}")]
    ForkFailed(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunlimError>;

/// The structured termination status of a supervision run, in the priority
/// order used for classification (see `Supervisor::classify`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The child ran to completion; carries its exit code.
    Ok(i32),
    ExecFailed,
    OutOfTime,
    OutOfMemory,
    SegmentationFault,
    BusError,
    ForkFailed,
    InternalError,
    /// The child died from a signal not otherwise classified.
    OtherSignal(i32),
}

impl ExitStatus {
    /// The process exit code runlim itself should return, per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitStatus::Ok(code) => *code,
            ExitStatus::ExecFailed => 1,
            ExitStatus::OutOfTime => 2,
            ExitStatus::OutOfMemory => 3,
            ExitStatus::SegmentationFault => 4,
            ExitStatus::BusError => 5,
            ExitStatus::ForkFailed => 6,
            ExitStatus::InternalError => 7,
            ExitStatus::OtherSignal(sig) => 128 + sig,
        }
    }

    /// The `status:` line's human-readable description.
    pub fn description(&self) -> String {
        match self {
            ExitStatus::Ok(_) => "ok".to_string(),
            ExitStatus::ExecFailed => "execvp failed".to_string(),
            ExitStatus::OutOfTime => "out of time".to_string(),
            ExitStatus::OutOfMemory => "out of memory".to_string(),
            ExitStatus::SegmentationFault => "segmentation fault".to_string(),
            ExitStatus::BusError => "bus error".to_string(),
            ExitStatus::ForkFailed => "fork failed".to_string(),
            ExitStatus::InternalError => "internal error".to_string(),
            ExitStatus::OtherSignal(sig) => format!("signal({sig})"),
        }
    }

    /// Whether this status reflects the *child* dying from a signal that
    /// wasn't already attributed to a resource limit (used to decide
    /// whether `-k` should re-raise that signal on the supervisor itself).
    pub fn is_non_resource_signal(&self) -> bool {
        matches!(
            self,
            ExitStatus::SegmentationFault | ExitStatus::BusError | ExitStatus::OtherSignal(_)
        )
    }
}
