//! External network-configuration command execution
//!
//! Virtual interfaces are managed through the system `ip` utility. Every
//! invocation uses an explicit argument vector, never a shell string, so
//! address, device, and label values cannot smuggle shell metacharacters
//! into the command line.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::IfaceError;

/// Captured result of an external command invocation
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit status (255 when the process was killed by a signal)
    pub status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a command with the given argument vector, capturing output.
///
/// # Errors
///
/// Returns `IfaceError::Spawn` only when the process cannot be started
/// at all; a non-zero exit status is reported through `CommandOutput`
/// for the caller to interpret against its own contract.
pub async fn run(program: &str, args: &[&str]) -> Result<CommandOutput, IfaceError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| IfaceError::Spawn {
            command: format!("{program} {}", args.join(" ")),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        status: output.status.code().unwrap_or(255),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
