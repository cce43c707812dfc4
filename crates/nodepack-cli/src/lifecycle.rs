use std::path::Path;
use std::process::Command;

use anyhow::Result;
use nodepack_core::{InstallError, LifecycleRunner, ResolvedPackage};
use tracing::debug;

use crate::process::run_checked;

/// Runs lifecycle scripts through the platform shell inside the package
/// directory, with the event name exposed in the environment.
pub struct ShellLifecycle;

impl LifecycleRunner for ShellLifecycle {
    fn run(&self, phase: &str, package: &ResolvedPackage, realpath: &Path) -> Result<()> {
        let Some(line) = package.manifest.scripts.get(phase) else {
            return Ok(());
        };
        debug!(phase, package = %package.label(), "running lifecycle script");

        let mut command = build_script_command(line);
        command
            .current_dir(realpath)
            .env("NODEPACK_LIFECYCLE_EVENT", phase)
            .env("NODEPACK_PACKAGE_NAME", &package.name)
            .env("NODEPACK_PACKAGE_VERSION", package.version.to_string());
        run_checked(&mut command).map_err(|err| {
            InstallError::Lifecycle {
                phase: phase.to_string(),
                package: package.label(),
                reason: format!("{err:#}"),
            }
            .into()
        })
    }
}

pub(crate) fn build_script_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        command
    }
}
