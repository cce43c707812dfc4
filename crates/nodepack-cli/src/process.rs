use std::path::Path;
use std::process::{Command, Output};

use anyhow::{anyhow, Context, Result};

/// Runs a collaborator command to completion, reporting the program name,
/// exit status and trimmed output when it fails.
pub(crate) fn run_checked(command: &mut Command) -> Result<()> {
    capture_checked(command).map(|_| ())
}

/// Like [`run_checked`], but hands back whatever the command printed.
pub(crate) fn capture_checked(command: &mut Command) -> Result<String> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .output()
        .with_context(|| format!("could not launch '{program}'"))?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    Err(anyhow!("'{program}' {}", describe_failure(&output)))
}

fn describe_failure(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if detail.is_empty() {
        format!("failed with {}", output.status)
    } else {
        format!("failed with {}: {detail}", output.status)
    }
}

/// PowerShell single-quoted literals escape an embedded quote by doubling
/// it.
pub(crate) fn powershell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for ch in value.chars() {
        quoted.push(ch);
        if ch == '\'' {
            quoted.push('\'');
        }
    }
    quoted
}

pub(crate) fn powershell_quote_path(path: &Path) -> String {
    powershell_quote(&path.to_string_lossy())
}
