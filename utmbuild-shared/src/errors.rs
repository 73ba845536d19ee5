//! Error taxonomy for image builds.
//!
//! Errors fall into four groups:
//! - **Environment**: control binary missing, unsupported or malformed
//!   hypervisor version. Fatal before any step runs.
//! - **Step failures**: a control command exits non-zero or its output does not
//!   contain the expected handle. Halts the pipeline.
//! - **Cleanup failures**: reported as warnings by the runner, never returned.
//! - **Programmer errors**: invalid arguments or context misuse.

use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The host cannot run builds at all (binary missing, UTM not installed).
    #[error("environment error: {0}")]
    Environment(String),

    /// The detected hypervisor version has no known command dialect.
    #[error("unsupported UTM version: {0}")]
    UnsupportedVersion(String),

    /// The version string could not be parsed as `major.minor.patch`.
    #[error("invalid UTM version format: {0:?}")]
    InvalidVersion(String),

    /// An external control command exited unsuccessfully.
    #[error("{program} error: {message}")]
    Control { program: String, message: String },

    /// A control command succeeded but its output lacked the expected handle.
    #[error("error extracting {what} from output: {output}")]
    OutputMismatch { what: String, output: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("build cancelled")]
    Cancelled,

    #[error("build halted: {0}")]
    Halted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Wrap this error with the name of the operation that failed.
    ///
    /// Keeps the variant for control and output errors so callers can still
    /// distinguish them; everything else becomes `Internal`.
    pub fn context(self, operation: &str) -> Self {
        match self {
            BuildError::Control { program, message } => BuildError::Control {
                program,
                message: format!("{}: {}", operation, message),
            },
            BuildError::OutputMismatch { what, output } => BuildError::OutputMismatch {
                what: format!("{} ({})", what, operation),
                output,
            },
            BuildError::Cancelled => BuildError::Cancelled,
            other => BuildError::Internal(format!("{}: {}", operation, other)),
        }
    }

    /// True for errors that mean the build could never have started.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            BuildError::Environment(_)
                | BuildError::UnsupportedVersion(_)
                | BuildError::InvalidVersion(_)
        )
    }
}
