use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use nodepack_core::{
    DistRef, Fetcher, InstallError, PackageManifest, PackageSpec, Requested, ResolvedPackage,
    SpecKind,
};
use semver::{Version, VersionReq};
use serde::Deserialize;

use crate::process::{capture_checked, powershell_quote, powershell_quote_path, run_checked};

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

#[derive(Debug, Deserialize)]
pub(crate) struct RegistryDocument {
    #[serde(default)]
    versions: BTreeMap<Version, RegistryVersion>,
    #[serde(default, rename = "dist-tags")]
    dist_tags: BTreeMap<String, Version>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegistryVersion {
    #[serde(flatten)]
    manifest: PackageManifest,
    #[serde(default)]
    dist: Option<RegistryDist>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegistryDist {
    tarball: String,
    #[serde(default)]
    shasum: Option<String>,
}

/// Registry-backed fetcher. Metadata comes from the registry's package
/// document; payloads are downloaded with the system HTTP client. Local
/// folders and tarballs are resolved from disk; git and hosted specs are
/// outside this client's reach.
pub struct RegistryClient {
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, encode_package_name(name))
    }

    fn fetch_document(&self, name: &str) -> Result<RegistryDocument> {
        let url = self.package_url(name);
        let scratch = scratch_path("metadata");
        let outcome = download_file(&url, &scratch)
            .and_then(|_| {
                fs::read_to_string(&scratch)
                    .with_context(|| format!("failed to read fetched metadata for '{name}'"))
            })
            .and_then(|raw| {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse registry document for '{name}'"))
            });
        let _ = fs::remove_file(&scratch);
        outcome
    }

    fn resolve_registry(&self, spec: &PackageSpec) -> Result<ResolvedPackage> {
        let name = spec
            .name
            .as_deref()
            .ok_or_else(|| anyhow!("registry spec '{}' has no package name", spec.raw))?;
        let document = self.fetch_document(name)?;
        let version = select_version(&document, spec)?;
        build_record(version, spec)
    }

    fn resolve_local(&self, spec: &PackageSpec, context_dir: &Path) -> Result<ResolvedPackage> {
        let target = PathBuf::from(&spec.target);
        let path = if target.is_absolute() {
            target
        } else {
            context_dir.join(target)
        };

        if path.is_dir() {
            let manifest_path = path.join("package.json");
            let raw = fs::read_to_string(&manifest_path)
                .with_context(|| format!("failed to read {}", manifest_path.display()))?;
            let manifest = PackageManifest::from_json_str(&raw)
                .with_context(|| format!("failed to parse {}", manifest_path.display()))?;
            let dist = DistRef {
                tarball: path.display().to_string(),
                shasum: None,
            };
            return ResolvedPackage::from_manifest(
                manifest,
                Some(Requested::from_spec(spec)),
                Some(dist),
            );
        }

        let manifest = read_manifest_from_tarball(&path)?;
        let dist = DistRef {
            tarball: path.display().to_string(),
            shasum: None,
        };
        ResolvedPackage::from_manifest(manifest, Some(Requested::from_spec(spec)), Some(dist))
    }

    fn resolve_remote(&self, spec: &PackageSpec) -> Result<ResolvedPackage> {
        let scratch = scratch_path("remote");
        let outcome = download_file(&spec.target, &scratch)
            .and_then(|_| read_manifest_from_tarball(&scratch));
        let _ = fs::remove_file(&scratch);

        let manifest = outcome
            .with_context(|| format!("failed to inspect remote tarball '{}'", spec.target))?;
        let dist = DistRef {
            tarball: spec.target.clone(),
            shasum: None,
        };
        ResolvedPackage::from_manifest(manifest, Some(Requested::from_spec(spec)), Some(dist))
    }
}

impl Fetcher for RegistryClient {
    fn fetch_metadata(&self, spec: &PackageSpec, context_dir: &Path) -> Result<ResolvedPackage> {
        match spec.kind {
            SpecKind::Version | SpecKind::Range | SpecKind::Tag => self.resolve_registry(spec),
            SpecKind::Local => self.resolve_local(spec, context_dir),
            SpecKind::Remote => self.resolve_remote(spec),
            SpecKind::Git | SpecKind::Hosted => Err(InstallError::Resolve {
                spec: spec.raw.clone(),
                reason: "git and hosted specs are not supported by the registry client"
                    .to_string(),
            }
            .into()),
        }
    }

    fn fetch_tarball(&self, package: &ResolvedPackage, dest: &Path) -> Result<()> {
        let dist = package.dist.as_ref().ok_or_else(|| {
            anyhow!("package {} has no distribution reference", package.label())
        })?;

        if dist.tarball.starts_with("http://") || dist.tarball.starts_with("https://") {
            return download_file(&dist.tarball, dest);
        }

        let source = PathBuf::from(&dist.tarball);
        if source.is_dir() {
            return pack_directory(&source, dest);
        }
        fs::copy(&source, dest).with_context(|| {
            format!(
                "failed to copy local tarball {} to {}",
                source.display(),
                dest.display()
            )
        })?;
        Ok(())
    }
}

pub(crate) fn select_version<'a>(
    document: &'a RegistryDocument,
    spec: &PackageSpec,
) -> Result<&'a RegistryVersion> {
    let found = match spec.kind {
        SpecKind::Version => {
            let wanted = Version::parse(&spec.target)
                .with_context(|| format!("invalid version in spec '{}'", spec.raw))?;
            document.versions.get(&wanted)
        }
        SpecKind::Range => {
            let requirement = VersionReq::parse(&spec.target)
                .with_context(|| format!("invalid range in spec '{}'", spec.raw))?;
            document
                .versions
                .iter()
                .rev()
                .find(|(version, _)| requirement.matches(version))
                .map(|(_, entry)| entry)
        }
        SpecKind::Tag => document
            .dist_tags
            .get(&spec.target)
            .and_then(|version| document.versions.get(version)),
        _ => None,
    };

    found.ok_or_else(|| {
        InstallError::Resolve {
            spec: spec.raw.clone(),
            reason: "no satisfying version in the registry".to_string(),
        }
        .into()
    })
}

fn build_record(entry: &RegistryVersion, spec: &PackageSpec) -> Result<ResolvedPackage> {
    let dist = entry.dist.as_ref().map(|dist| DistRef {
        tarball: dist.tarball.clone(),
        shasum: dist.shasum.clone(),
    });
    ResolvedPackage::from_manifest(
        entry.manifest.clone(),
        Some(Requested::from_spec(spec)),
        dist,
    )
}

/// Scoped names keep their `@` but encode the separating slash, the shape
/// registry endpoints expect.
pub(crate) fn encode_package_name(name: &str) -> String {
    name.replace('/', "%2F")
}

fn scratch_path(prefix: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!(
        "nodepack-{prefix}-{}-{nanos}",
        std::process::id()
    ))
}

/// Reads `package/package.json` out of a package tarball without unpacking
/// the rest of it.
fn read_manifest_from_tarball(tarball: &Path) -> Result<PackageManifest> {
    let mut command = build_tar_manifest_command(tarball);
    let raw = capture_checked(&mut command).with_context(|| {
        format!(
            "failed to read package manifest from tarball {}",
            tarball.display()
        )
    })?;
    PackageManifest::from_json_str(&raw)
        .with_context(|| format!("failed to parse manifest inside {}", tarball.display()))
}

pub(crate) fn build_tar_manifest_command(tarball: &Path) -> Command {
    let mut command = Command::new("tar");
    command
        .arg("-xzOf")
        .arg(tarball)
        .arg("package/package.json");
    command
}

fn pack_directory(dir: &Path, dest: &Path) -> Result<()> {
    let parent = dir
        .parent()
        .ok_or_else(|| anyhow!("cannot pack directory without a parent: {}", dir.display()))?;
    let name = dir
        .file_name()
        .ok_or_else(|| anyhow!("cannot pack unnamed directory: {}", dir.display()))?;
    let mut command = Command::new("tar");
    command
        .arg("-czf")
        .arg(dest)
        .arg("-C")
        .arg(parent)
        .arg(name);
    run_checked(&mut command)
        .with_context(|| format!("failed to pack local folder {}", dir.display()))
}

pub(crate) fn download_file(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let part_path = dest.with_file_name(format!(
        "{}.part",
        dest.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("download")
    ));

    let result = if cfg!(windows) {
        download_with_powershell(url, &part_path)
    } else {
        download_with_curl(url, &part_path).or_else(|_| download_with_wget(url, &part_path))
    };

    if let Err(err) = result {
        let _ = fs::remove_file(&part_path);
        return Err(InstallError::Fetch {
            package: url.to_string(),
            reason: format!("{err:#}"),
        }
        .into());
    }

    if dest.exists() {
        fs::remove_file(dest)
            .with_context(|| format!("failed to replace {}", dest.display()))?;
    }
    fs::rename(&part_path, dest)
        .with_context(|| format!("failed to move download into place: {}", dest.display()))?;
    Ok(())
}

pub(crate) fn build_curl_command(url: &str, out_path: &Path) -> Command {
    let mut command = Command::new("curl");
    command
        .arg("-fsSL")
        .arg("--retry")
        .arg("2")
        .arg("-o")
        .arg(out_path)
        .arg(url);
    command
}

fn download_with_curl(url: &str, out_path: &Path) -> Result<()> {
    run_checked(&mut build_curl_command(url, out_path)).context("curl download failed")
}

fn download_with_wget(url: &str, out_path: &Path) -> Result<()> {
    let mut command = Command::new("wget");
    command.arg("-qO").arg(out_path).arg(url);
    run_checked(&mut command).context("wget download failed")
}

fn download_with_powershell(url: &str, out_path: &Path) -> Result<()> {
    let mut command = Command::new("powershell");
    command.arg("-NoProfile").arg("-Command").arg(format!(
        "Invoke-WebRequest -Uri '{}' -OutFile '{}'",
        powershell_quote(url),
        powershell_quote_path(out_path)
    ));
    run_checked(&mut command).context("powershell download failed")
}
