//! Error types for kbot.
//!
//! Library crates use [`KbotError`] via `thiserror`.
//! App crates (kbot/mailbot) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbot operations.
#[derive(Debug, thiserror::Error)]
pub enum KbotError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the build service or download host.
    #[error("network error: {0}")]
    Network(String),

    /// The build service answered with an XML-RPC fault.
    #[error("remote call failed with fault {code}: {message}")]
    Rpc { code: i64, message: String },

    /// XML or field-level parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, bad address, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The build service does not know this build.
    #[error("unknown build: {name}")]
    UnknownBuild { name: String },

    /// No sub-task of the build task runs on the requested architecture.
    #[error("task {task_id} has no sub-task for arch {arch}")]
    NoMatchingSubTask { task_id: i64, arch: String },

    /// More than one sub-task runs on the requested architecture.
    #[error("task {task_id} has {count} sub-tasks for arch {arch}, expected one")]
    AmbiguousSubTask {
        task_id: i64,
        arch: String,
        count: usize,
    },

    /// No changelog entry matches the build version.
    #[error("no changelog entry found for build {name}")]
    NoChangelogEntry { name: String },

    /// No artifact in the task result matches the build name.
    #[error("no artifact matching {name} in task {task_id}")]
    NoMatchingArtifact { name: String, task_id: i64 },

    /// A result file name or body does not follow the expected layout.
    #[error("malformed result file {path:?}: {message}")]
    MalformedResult { path: PathBuf, message: String },

    /// No result files were found to report on.
    #[error("no test results found in {path:?}")]
    NoResults { path: PathBuf },

    /// The hypervisor platform code has no label.
    #[error("unknown hypervisor platform code: {code}")]
    UnknownHypervisorCode { code: String },

    /// Message building or SMTP delivery error.
    #[error("mail error: {0}")]
    Mail(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbotError>;

impl KbotError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "nothing usable to report on" class of errors.
    ///
    /// The report driver treats these as an expected outcome of a broken
    /// test run rather than a failure of the driver itself.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::NoResults { .. } | Self::MalformedResult { .. })
    }
}
