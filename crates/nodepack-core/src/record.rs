use anyhow::{anyhow, Result};
use semver::Version;

use crate::{PackageManifest, Requested};

/// Where the fetcher gets the package payload from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistRef {
    pub tarball: String,
    pub shasum: Option<String>,
}

/// A concrete package: the manifest pinned to one version, plus the
/// descriptor it was requested under and an optional payload reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: Version,
    pub requested: Option<Requested>,
    pub manifest: PackageManifest,
    pub dist: Option<DistRef>,
}

impl ResolvedPackage {
    pub fn from_manifest(
        manifest: PackageManifest,
        requested: Option<Requested>,
        dist: Option<DistRef>,
    ) -> Result<Self> {
        if manifest.name.trim().is_empty() {
            return Err(anyhow!("resolved package manifest has no name"));
        }
        let version = manifest
            .version
            .clone()
            .ok_or_else(|| anyhow!("package '{}' has no version", manifest.name))?;
        Ok(Self {
            name: manifest.name.clone(),
            version,
            requested,
            manifest,
            dist,
        })
    }

    /// The record for a project root, which may be unnamed and unversioned.
    pub fn root(manifest: PackageManifest) -> Self {
        let version = manifest
            .version
            .clone()
            .unwrap_or_else(|| Version::new(0, 0, 0));
        Self {
            name: manifest.name.clone(),
            version,
            requested: None,
            manifest,
            dist: None,
        }
    }

    pub fn label(&self) -> String {
        if self.name.is_empty() {
            "(root)".to_string()
        } else {
            format!("{}@{}", self.name, self.version)
        }
    }
}
