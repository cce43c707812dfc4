use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use nodepack_core::{InstallError, PackageManifest, ResolvedPackage};
use nodepack_resolver::{NodeId, Tree, MODULES_DIR};
use tracing::warn;

use crate::layout::{ProjectLayout, MANIFEST_FILE};

/// Discovers the tree currently on disk under the project's `node_modules`.
/// Directories that do not look like installed packages are skipped with a
/// warning; they stay invisible to the differ and are left alone.
pub fn read_current_tree(layout: &ProjectLayout, root_manifest: &PackageManifest) -> Result<Tree> {
    let mut tree = Tree::new(ResolvedPackage::root(root_manifest.clone()), layout.root());
    let modules = layout.modules_dir();
    if modules.is_dir() {
        let root = tree.root();
        read_modules_dir(&mut tree, root, &modules)?;
    }
    Ok(tree)
}

fn read_modules_dir(tree: &mut Tree, parent: NodeId, dir: &Path) -> Result<()> {
    for (name, path) in package_entries(dir)? {
        read_package(tree, parent, &name, &path)?;
    }
    Ok(())
}

/// Lists installed package directories, expanding `@scope` directories into
/// scoped names. Dot-prefixed entries (staging, bin stubs) are skipped.
fn package_entries(dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
    let mut found = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        if let Some(scope) = name.strip_prefix('@') {
            for scoped in fs::read_dir(entry.path())
                .with_context(|| format!("failed to read {}", entry.path().display()))?
            {
                let scoped = scoped?;
                if !scoped.file_type()?.is_dir() {
                    continue;
                }
                let Some(inner) = scoped.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                found.push((format!("@{scope}/{inner}"), scoped.path()));
            }
            continue;
        }

        found.push((name, entry.path()));
    }

    found.sort();
    Ok(found)
}

fn read_package(tree: &mut Tree, parent: NodeId, expected_name: &str, dir: &Path) -> Result<()> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let raw = match fs::read_to_string(&manifest_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(
                "{}; ignoring directory",
                InstallError::ManifestMissing(manifest_path)
            );
            return Ok(());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read {}", manifest_path.display()));
        }
    };

    let manifest = match PackageManifest::from_json_str(&raw) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!(path = %manifest_path.display(), "ignoring unreadable package manifest: {err:#}");
            return Ok(());
        }
    };
    if manifest.name != expected_name {
        warn!(
            path = %dir.display(),
            declared = %manifest.name,
            "installed package name does not match its directory; ignoring"
        );
        return Ok(());
    }
    let record = match ResolvedPackage::from_manifest(manifest, None, None) {
        Ok(record) => record,
        Err(err) => {
            warn!(path = %dir.display(), "ignoring incomplete installed package: {err:#}");
            return Ok(());
        }
    };

    let node = tree.attach_child(parent, record, &[parent]);
    let nested = dir.join(MODULES_DIR);
    if nested.is_dir() {
        read_modules_dir(tree, node, &nested)?;
    }
    Ok(())
}
