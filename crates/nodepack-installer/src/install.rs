use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nodepack_core::{
    InstallError, LockfileRoot, PackageManifest, PackageSpec, ResolvedPackage, SpecKind,
};
use nodepack_resolver::{
    diff_trees, inflate_lockfile, load_args, load_deps, load_dev_deps, validate_tree, Action,
    ActionKind, MetadataResolver,
};
use tracing::{info, warn};

use crate::current::read_current_tree;
use crate::decompose::decompose;
use crate::layout::{global_install_root, ProjectLayout, STAGING_DIR};
use crate::locking;
use crate::schedule::{execute_plan, Externals};

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub global: bool,
    pub production: bool,
    pub dev: bool,
    pub unicode: bool,
    pub npat: bool,
    pub concurrency: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            global: false,
            production: false,
            dev: false,
            unicode: false,
            npat: false,
            concurrency: 10,
        }
    }
}

impl InstallOptions {
    fn wants_dev(&self) -> bool {
        self.dev || !self.production
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallSummary {
    pub actions: Vec<Action>,
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub moved: usize,
}

impl InstallSummary {
    fn from_actions(actions: Vec<Action>) -> Self {
        let count = |kind: ActionKind| actions.iter().filter(|action| action.kind == kind).count();
        Self {
            added: count(ActionKind::Add),
            removed: count(ActionKind::Remove),
            updated: count(ActionKind::Update),
            moved: count(ActionKind::Move),
            actions,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Installs into the default location: the current project directory, or
/// the global install root with `--global`.
pub fn install(
    options: &InstallOptions,
    externals: &Externals<'_>,
    args: &[String],
) -> Result<InstallSummary> {
    let target = if options.global {
        global_install_root()?
    } else {
        std::env::current_dir().context("failed to determine current project directory")?
    };
    install_at(options, externals, &target, args)
}

/// Installs into an explicit location. Holds the staging lock for the whole
/// pipeline; the lock and the staging directory are released on every exit
/// path without masking the primary error.
pub fn install_at(
    options: &InstallOptions,
    externals: &Externals<'_>,
    target: &Path,
    args: &[String],
) -> Result<InstallSummary> {
    let layout = ProjectLayout::new(target);
    layout.ensure_modules_dir()?;
    let lock = locking::lock(&layout.modules_dir(), STAGING_DIR)?;

    match run_install(options, externals, &layout, args) {
        Ok(summary) => {
            locking::unlock(lock)?;
            Ok(summary)
        }
        Err(err) => {
            if let Err(unlock_err) = locking::unlock(lock) {
                warn!("failed to release install lock after error: {unlock_err:#}");
            }
            let staging = layout.staging_dir();
            if staging.exists() {
                if let Err(cleanup_err) = fs::remove_dir_all(&staging) {
                    warn!("failed to clean staging directory after error: {cleanup_err:#}");
                }
            }
            Err(err)
        }
    }
}

fn run_install(
    options: &InstallOptions,
    externals: &Externals<'_>,
    layout: &ProjectLayout,
    args: &[String],
) -> Result<InstallSummary> {
    let manifest = read_root_manifest(layout)?;
    let specs = parse_args(layout, args, options)?;
    let lockfile = read_lockfile(layout, &manifest)?;

    let current = read_current_tree(layout, &manifest)?;
    let mut ideal = current.clone();
    let resolver = MetadataResolver::new(externals.fetcher);
    let root = ideal.root();

    if !specs.is_empty() {
        // Explicit targets only: the rest of the tree is taken as-is.
        ideal.mark_all_loaded();
        load_args(&mut ideal, &resolver, &specs)?;
    } else if let Some(lockfile) = &lockfile {
        ideal.mark_all_loaded();
        inflate_lockfile(&mut ideal, &resolver, root, &lockfile.dependencies)?;
        if options.wants_dev() {
            load_dev_deps(&mut ideal, &resolver)?;
        }
    } else {
        load_deps(&mut ideal, &resolver, root)?;
        if options.wants_dev() {
            load_dev_deps(&mut ideal, &resolver)?;
        }
    }

    validate_tree(&ideal)?;
    let actions = diff_trees(&current, &ideal);
    info!(actions = actions.len(), "computed install plan");

    let plan = decompose(&actions, options.npat);
    execute_plan(layout, externals, &actions, &plan, options.concurrency)?;

    if specs.is_empty() {
        run_root_lifecycle(externals, layout, &manifest, options)?;
    }

    Ok(InstallSummary::from_actions(actions))
}

fn read_root_manifest(layout: &ProjectLayout) -> Result<PackageManifest> {
    let path = layout.manifest_path();
    match fs::read_to_string(&path) {
        Ok(raw) => PackageManifest::from_json_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(
                "{}; treating the root as an empty manifest",
                InstallError::ManifestMissing(path)
            );
            Ok(PackageManifest::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn read_lockfile(
    layout: &ProjectLayout,
    manifest: &PackageManifest,
) -> Result<Option<LockfileRoot>> {
    let path = layout.lockfile_path();
    match fs::read_to_string(&path) {
        Ok(raw) => LockfileRoot::from_json_str(&raw)
            .map(Some)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(manifest.shrinkwrap.clone()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Parses explicit install targets. In non-global mode an argument that
/// points at the project itself is discarded to prevent self-installation.
fn parse_args(
    layout: &ProjectLayout,
    args: &[String],
    options: &InstallOptions,
) -> Result<Vec<PackageSpec>> {
    let project_root = canonical_or(layout.root());
    let mut specs = Vec::new();
    for raw in args {
        let spec = PackageSpec::parse(raw)?;
        if !options.global && spec.kind == SpecKind::Local {
            let candidate = PathBuf::from(&spec.target);
            let candidate = if candidate.is_absolute() {
                candidate
            } else {
                layout.root().join(candidate)
            };
            if canonical_or(&candidate) == project_root {
                warn!(spec = %raw, "refusing to install the project into itself");
                continue;
            }
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn canonical_or(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Top-level lifecycle hooks, run against the root package after the staged
/// pipeline when no explicit targets were given.
fn run_root_lifecycle(
    externals: &Externals<'_>,
    layout: &ProjectLayout,
    manifest: &PackageManifest,
    options: &InstallOptions,
) -> Result<()> {
    let root_package = ResolvedPackage::root(manifest.clone());
    let mut phases = vec!["preinstall", "build", "postinstall"];
    if options.npat {
        phases.push("test");
    }
    if !options.production {
        phases.push("prepublish");
    }

    for phase in phases {
        if !manifest.scripts.contains_key(phase) {
            continue;
        }
        externals
            .lifecycle
            .run(phase, &root_package, layout.root())
            .map_err(|err| InstallError::Lifecycle {
                phase: phase.to_string(),
                package: root_package.label(),
                reason: format!("{err:#}"),
            })?;
    }
    Ok(())
}
