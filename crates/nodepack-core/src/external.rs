use std::path::Path;

use anyhow::Result;

use crate::{PackageSpec, ResolvedPackage};

/// Registry/network client. `fetch_metadata` normalizes a spec into a
/// resolved record; `fetch_tarball` materializes the payload at `dest`.
/// Implementations are shared across install workers, hence `Sync`.
pub trait Fetcher: Sync {
    fn fetch_metadata(&self, spec: &PackageSpec, context_dir: &Path) -> Result<ResolvedPackage>;
    fn fetch_tarball(&self, package: &ResolvedPackage, dest: &Path) -> Result<()>;
}

/// Unpacks a fetched tarball so that `dest` holds the package root.
pub trait Extractor: Sync {
    fn extract(&self, tarball: &Path, dest: &Path) -> Result<()>;
}

/// Runs one lifecycle script of a package inside `realpath`.
pub trait LifecycleRunner: Sync {
    fn run(&self, phase: &str, package: &ResolvedPackage, realpath: &Path) -> Result<()>;
}
