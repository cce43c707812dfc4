use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use nodepack_core::{Extractor, InstallError};

use crate::process::run_checked;

/// Unpacks registry tarballs with the system `tar`. Package tarballs root
/// their payload in a `package/` directory, which is stripped away so the
/// destination holds the package files directly.
pub struct TarballExtractor;

impl Extractor for TarballExtractor {
    fn extract(&self, tarball: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;
        run_checked(&mut build_extract_command(tarball, dest)).map_err(|err| {
            InstallError::Extract {
                package: tarball.display().to_string(),
                reason: format!("{err:#}"),
            }
            .into()
        })
    }
}

pub(crate) fn build_extract_command(tarball: &Path, dest: &Path) -> Command {
    let mut command = Command::new("tar");
    command
        .arg("-xzf")
        .arg(tarball)
        .arg("-C")
        .arg(dest)
        .arg("--strip-components=1");
    command
}
