//! The provisioning-engine boundary: an opaque external subprocess
//! that applies one task's module.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Classified, ErrorKind};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch engine binary: {0}")]
    Launch(#[from] std::io::Error),
    #[error("engine exited with status {status}")]
    NonZeroExit { status: i32 },
    #[error("apply cancelled")]
    Cancelled,
}

impl Classified for EngineError {
    fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Launch(_) => ErrorKind::Transient,
            EngineError::NonZeroExit { .. } => ErrorKind::Transient,
            EngineError::Cancelled => ErrorKind::Cancellation,
        }
    }
}

/// Result of a `plan`: the diff text plus whether it contains any
/// change at all.
pub struct PlanOutcome {
    pub summary: String,
    pub has_changes: bool,
}

/// Sequences `init` / `plan` / `apply` / `destroy` against one task's
/// working directory. CTS treats everything the subprocess prints as
/// opaque log output; only the exit code carries meaning.
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    async fn init(&self, working_dir: &Path) -> Result<(), EngineError>;
    async fn plan(&self, working_dir: &Path) -> Result<PlanOutcome, EngineError>;
    async fn apply(&self, working_dir: &Path, cancel: &CancellationToken) -> Result<(), EngineError>;
    async fn destroy(&self, working_dir: &Path) -> Result<(), EngineError>;
}

/// Drives a real provisioning-engine binary as a subprocess per
/// invocation, streaming its stdout/stderr to `tracing::debug!`.
pub struct SubprocessEngine {
    binary: PathBuf,
}

impl SubprocessEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, working_dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Spawns `cmd`, draining stdout and stderr concurrently so a full
    /// pipe buffer on one stream can't stall the other, and returns
    /// collected stdout plus the exit code.
    async fn run_to_completion(&self, mut cmd: Command) -> Result<(String, i32), EngineError> {
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let drain_stdout = async move {
            let mut collected = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(stream = "stdout", "{line}");
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        };
        let drain_stderr = async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(stream = "stderr", "{line}");
            }
        };

        let (collected, _, status) = tokio::join!(drain_stdout, drain_stderr, child.wait());
        let status = status?;
        Ok((collected, status.code().unwrap_or(-1)))
    }

    async fn run_checked(&self, working_dir: &Path, args: &[&str]) -> Result<String, EngineError> {
        let (output, code) = self.run_to_completion(self.command(working_dir, args)).await?;
        if code != 0 {
            return Err(EngineError::NonZeroExit { status: code });
        }
        Ok(output)
    }
}

#[async_trait]
impl ProvisioningEngine for SubprocessEngine {
    async fn init(&self, working_dir: &Path) -> Result<(), EngineError> {
        self.run_checked(working_dir, &["init"]).await?;
        Ok(())
    }

    async fn plan(&self, working_dir: &Path) -> Result<PlanOutcome, EngineError> {
        let summary = self.run_checked(working_dir, &["plan"]).await?;
        let has_changes = !summary.contains("No changes.");
        Ok(PlanOutcome { summary, has_changes })
    }

    async fn apply(
        &self,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let cmd = self.command(working_dir, &["apply", "-auto-approve"]);
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.run_to_completion(cmd) => {
                let (_, code) = result?;
                if code == 0 {
                    Ok(())
                } else {
                    Err(EngineError::NonZeroExit { status: code })
                }
            }
        }
    }

    async fn destroy(&self, working_dir: &Path) -> Result<(), EngineError> {
        self.run_checked(working_dir, &["destroy", "-auto-approve"]).await?;
        Ok(())
    }
}
