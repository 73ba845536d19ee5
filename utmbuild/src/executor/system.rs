//! Process-backed command runner.

use super::{CommandOutput, CommandRunner, Invocation};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Runs invocations as child processes of this process.
///
/// Stdout and stderr are captured separately. Script content is written to
/// the child's stdin from a separate task while this task waits for the child
/// to exit; the writer is joined before `run` returns.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// Deadline for a single invocation. The child is killed when it expires.
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> BuildResult<CommandOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future (timeout) must not leak the child.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            let err_msg = format!(
                "Failed to spawn {}: {}",
                invocation.program.display(),
                e
            );
            tracing::error!("{}", err_msg);
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::Environment(err_msg)
            } else {
                BuildError::Io(e)
            }
        })?;

        let writer = match (child.stdin.take(), invocation.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(tokio::spawn(async move {
                let result = pipe.write_all(input.as_bytes()).await;
                // Close stdin so the interpreter sees EOF.
                drop(pipe);
                result
            })),
            _ => None,
        };

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(handle) = writer {
                        handle.abort();
                    }
                    return Err(BuildError::Control {
                        program: invocation.program_name(),
                        message: format!("timed out after {}s", limit.as_secs()),
                    });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited?;

        if let Some(handle) = writer {
            match handle.await {
                Ok(Ok(())) => {}
                // The interpreter may exit before reading all input; its exit
                // status is authoritative.
                Ok(Err(e)) => tracing::debug!("stdin write ended early: {}", e),
                Err(e) => tracing::warn!("stdin writer task failed: {}", e),
            }
        }

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
