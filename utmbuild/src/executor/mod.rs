//! Command execution for control binaries and script interpreters.
//!
//! ## Architecture
//!
//! - **CommandRunner**: the process seam. `SystemRunner` spawns real processes;
//!   tests substitute a recording runner.
//! - **execute**: wraps a runner with invocation logging and maps a non-zero
//!   exit status to `BuildError::Control` carrying the trimmed stderr.
//!
//! Every call is synchronous from the caller's point of view: the returned
//! future resolves only after the child process has exited (or was killed).

mod system;

pub use system::SystemRunner;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Content fed to the child's stdin, if any.
    pub stdin: Option<String>,
    /// Name of the script being run, bundled or inline (for logs and tests).
    pub script: Option<&'static str>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            script: None,
        }
    }

    /// Feed `body` to the process on stdin and tag the invocation with `name`.
    pub fn with_script(mut self, name: &'static str, body: &str) -> Self {
        self.script = Some(name);
        self.stdin = Some(body.to_string());
        self
    }

    /// Tag an inline script (`osascript -e ...`) without feeding stdin.
    pub fn tagged(mut self, name: &'static str) -> Self {
        self.script = Some(name);
        self
    }

    /// Short program name used in error messages (`utmctl`, `osascript`).
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        if let Some(script) = self.script {
            write!(f, " <{}>", script)?;
        }
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Spawns a process and waits for it to finish.
///
/// Implementations return `Ok` for any process that ran, regardless of exit
/// status; only failures to spawn or wait are errors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> BuildResult<CommandOutput>;
}

/// Run an invocation, logging it, and map a failed exit to `BuildError::Control`.
///
/// Returns the trimmed stdout on success.
pub async fn execute(runner: &dyn CommandRunner, invocation: &Invocation) -> BuildResult<String> {
    tracing::debug!(command = %invocation, "Executing control command");

    let output = runner.run(invocation).await?;

    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();
    if !stdout.is_empty() {
        tracing::debug!(program = %invocation.program_name(), "stdout: {}", stdout);
    }
    if !stderr.is_empty() {
        tracing::debug!(program = %invocation.program_name(), "stderr: {}", stderr);
    }

    if !output.is_success() {
        return Err(BuildError::Control {
            program: invocation.program_name(),
            message: if stderr.is_empty() {
                format!("exited with status {:?}", output.status)
            } else {
                stderr.to_string()
            },
        });
    }

    Ok(stdout.to_string())
}
