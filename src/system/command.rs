//! Shell Command Execution
//!
//! Command text is written to a temporary script which `bash` executes.
//! The script is removed when the call returns.

use std::io::Write;
use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Prefix of the temporary script files
const SCRIPT_PREFIX: &str = "hakeeper-cmd-";

/// Shell used to run command text
const SHELL: &str = "bash";

/// Write command text into a temporary script file
fn materialize(command_text: &str) -> Result<NamedTempFile> {
    let mut script = tempfile::Builder::new()
        .prefix(SCRIPT_PREFIX)
        .tempfile()?;
    script.write_all(command_text.as_bytes())?;
    script.flush()?;
    Ok(script)
}

/// Run command text and return its combined output with newlines removed
pub async fn run_command_output(command_text: &str, arguments: &[&str]) -> Result<String> {
    tracing::info!("CommandRun({}, {:?})", command_text, arguments);

    let script = materialize(command_text)?;
    let output = Command::new(SHELL)
        .arg(script.path())
        .args(arguments)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Command {
            command: command_text.to_string(),
            reason: e.to_string(),
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    tracing::debug!("CommandRun output: {}", combined);

    if !output.status.success() {
        tracing::error!("CommandRun failed: {}", output.status);
        return Err(Error::Command {
            command: command_text.to_string(),
            reason: format!("({}) {}", output.status, combined.trim_end()),
        });
    }

    tracing::info!("CommandRun successful: {}", output.status);
    Ok(combined.replace('\n', ""))
}

/// Run command text, discarding its standard output
pub async fn run_command_no_output(command_text: &str) -> Result<()> {
    tracing::debug!("execCmd: {}", command_text);

    let script = materialize(command_text)?;
    let status = Command::new(SHELL)
        .arg(script.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::Command {
            command: command_text.to_string(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(Error::Command {
            command: command_text.to_string(),
            reason: status.to_string(),
        });
    }

    Ok(())
}
