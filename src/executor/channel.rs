//! Privileged command channel. The host implementation talks to the device
//! through `adb`; every command runs with its own timeout.
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::{PilotError, PilotResult};
use crate::executor::status::ConnectionStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr, else stdout, else the exit code.
    pub fn error_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("command failed (exit code {})", self.exit_code)
    }
}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Checks whether the channel can currently reach the device.
    async fn probe(&self) -> ConnectionStatus;

    /// Runs a shell command line on the device. `Err` only when the command could not
    /// be dispatched or timed out; a non-zero exit is reported in `ShellOutput`.
    async fn exec(&self, command: &str) -> PilotResult<ShellOutput>;

    /// Runs a command and returns its raw stdout bytes.
    async fn exec_binary(&self, command: &str) -> PilotResult<Vec<u8>>;
}

pub struct AdbChannel {
    adb_path: String,
    serial: Option<String>,
    timeout: Duration,
    label: String,
}

impl AdbChannel {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>, timeout: Duration) -> Self {
        let label = match &serial {
            Some(s) => format!("adb:{s}"),
            None => "adb".to_string(),
        };
        Self {
            adb_path: adb_path.into(),
            serial,
            timeout,
            label,
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> PilotResult<std::process::Output> {
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(PilotError::Shell(format!("{what}: cannot spawn adb: {e}"))),
            Err(_) => Err(PilotError::Shell(format!(
                "{what}: timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl CommandChannel for AdbChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn probe(&self) -> ConnectionStatus {
        let mut cmd = self.base_command();
        cmd.arg("get-state");
        match self.run(cmd, "get-state").await {
            Ok(output) if output.status.success() => {
                let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if state == "device" {
                    ConnectionStatus::Ready
                } else {
                    tracing::debug!(state = %state, "device attached but not ready");
                    ConnectionStatus::Connecting
                }
            }
            Ok(_) => ConnectionStatus::Disabled,
            Err(e) => {
                tracing::warn!(error = %e, "adb probe failed");
                ConnectionStatus::Error
            }
        }
    }

    async fn exec(&self, command: &str) -> PilotResult<ShellOutput> {
        tracing::trace!(channel = %self.label, command = %command, "shell exec");
        let mut cmd = self.base_command();
        cmd.arg("shell").arg(command);
        let output = self.run(cmd, command).await?;
        Ok(ShellOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn exec_binary(&self, command: &str) -> PilotResult<Vec<u8>> {
        let mut cmd = self.base_command();
        cmd.arg("exec-out").arg(command);
        let output = self.run(cmd, command).await?;
        if !output.status.success() {
            return Err(PilotError::Shell(format!(
                "{command}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}
