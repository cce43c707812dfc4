use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nodepack_resolver::MODULES_DIR;

pub const STAGING_DIR: &str = ".staging";
pub const MANIFEST_FILE: &str = "package.json";
pub const LOCKFILE_FILE: &str = "nodepack-lock.json";

/// Paths of one install target: a project directory, its `node_modules`
/// tree, and the staging area used while an install is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(MODULES_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.modules_dir().join(STAGING_DIR)
    }

    /// Scratch directory of one plan entry. The index keeps slots unique
    /// when the same package lands at several tree positions.
    pub fn staging_slot(&self, index: usize, name: &str) -> PathBuf {
        self.staging_dir()
            .join(format!("{index}-{}", sanitize_slot_name(name)))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(LOCKFILE_FILE)
    }

    pub fn ensure_modules_dir(&self) -> Result<()> {
        let dir = self.modules_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))
    }
}

fn sanitize_slot_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

pub fn default_global_prefix() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows global prefix")?;
        return Ok(PathBuf::from(app_data).join("Nodepack"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve global prefix")?;
    Ok(PathBuf::from(home).join(".nodepack"))
}

/// The project directory global installs land in; its `node_modules` holds
/// globally installed packages.
pub fn global_install_root() -> Result<PathBuf> {
    Ok(default_global_prefix()?.join("lib"))
}
