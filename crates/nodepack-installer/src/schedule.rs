use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nodepack_core::{Extractor, Fetcher, InstallError, LifecycleRunner};
use nodepack_resolver::{Action, ActionKind};
use rayon::prelude::*;
use tracing::debug;

use crate::decompose::{InstallPlan, Phase};
use crate::layout::ProjectLayout;

pub const TARBALL_FILE: &str = "package.tgz";
pub const PAYLOAD_DIR: &str = "package";

/// The external collaborators the pipeline drives.
pub struct Externals<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub extractor: &'a dyn Extractor,
    pub lifecycle: &'a dyn LifecycleRunner,
}

#[derive(Debug, Clone)]
struct StagingSlot {
    tarball: PathBuf,
    payload: PathBuf,
}

/// Runs the decomposed plan against a fresh staging directory. Phases
/// execute strictly in order; parallel phases fan out over a bounded worker
/// pool, serial phases follow the differ's action order. On success the
/// staging directory is deleted; on failure it is left for the driver's
/// best-effort cleanup and the first error surfaces unchanged.
pub fn execute_plan(
    layout: &ProjectLayout,
    externals: &Externals<'_>,
    actions: &[Action],
    plan: &InstallPlan,
    concurrency: usize,
) -> Result<()> {
    if plan.is_empty() {
        return Ok(());
    }

    let staging = layout.staging_dir();
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("failed to clear stale staging dir: {}", staging.display()))?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("failed to create staging dir: {}", staging.display()))?;

    let slots: Vec<StagingSlot> = actions
        .iter()
        .enumerate()
        .map(|(index, action)| {
            let slot = layout.staging_slot(index, &action.name);
            StagingSlot {
                tarball: slot.join(TARBALL_FILE),
                payload: slot.join(PAYLOAD_DIR),
            }
        })
        .collect();

    run_phases(externals, actions, plan, &slots, concurrency)?;

    fs::remove_dir_all(&staging)
        .with_context(|| format!("failed to remove staging dir: {}", staging.display()))?;
    Ok(())
}

fn run_phases(
    externals: &Externals<'_>,
    actions: &[Action],
    plan: &InstallPlan,
    slots: &[StagingSlot],
    concurrency: usize,
) -> Result<()> {
    for phase in Phase::ORDER {
        let entries = plan.entries_for(phase);
        if entries.is_empty() {
            continue;
        }
        debug!(
            phase = phase.as_str(),
            entries = entries.len(),
            serial = phase.is_serial(),
            "running install phase"
        );

        if phase.is_serial() {
            for index in entries {
                run_step(externals, actions, slots, phase, index)?;
            }
        } else {
            run_parallel(&entries, concurrency, |index| {
                run_step(externals, actions, slots, phase, index)
            })?;
        }
    }
    Ok(())
}

fn run_parallel<F>(entries: &[usize], concurrency: usize, run: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .context("failed to build install worker pool")?;
    pool.install(|| entries.par_iter().try_for_each(|&index| run(index)))
}

fn run_step(
    externals: &Externals<'_>,
    actions: &[Action],
    slots: &[StagingSlot],
    phase: Phase,
    index: usize,
) -> Result<()> {
    let action = &actions[index];
    let slot = &slots[index];
    debug!(phase = phase.as_str(), action = %action.label(), "install step");

    match phase {
        Phase::Fetch => {
            let package = required_package(action)?;
            if let Some(parent) = slot.tarball.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            externals
                .fetcher
                .fetch_tarball(package, &slot.tarball)
                .map_err(|err| {
                    let package = action.label();
                    ensure_typed(err, |reason| InstallError::Fetch { package, reason })
                })?;
        }
        Phase::Extract => {
            externals
                .extractor
                .extract(&slot.tarball, &slot.payload)
                .map_err(|err| {
                    let package = action.label();
                    ensure_typed(err, |reason| InstallError::Extract { package, reason })
                })?;
        }
        Phase::Preinstall | Phase::Build => {
            run_script(externals, action, phase, &slot.payload)?;
        }
        Phase::Remove => {
            if action.path.exists() {
                fs::remove_dir_all(&action.path).with_context(|| {
                    format!("failed to remove {}", action.path.display())
                })?;
            }
        }
        Phase::Finalize => match action.kind {
            ActionKind::Move => {
                let from = action
                    .from_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("move action for {} has no source", action.label()))?;
                place_tree(from, &action.path)?;
            }
            _ => {
                if action.path.exists() {
                    fs::remove_dir_all(&action.path).with_context(|| {
                        format!("failed to replace {}", action.path.display())
                    })?;
                }
                place_tree(&slot.payload, &action.path)?;
            }
        },
        Phase::Install | Phase::Postinstall | Phase::Test => {
            run_script(externals, action, phase, &action.path)?;
        }
    }
    Ok(())
}

/// Invokes the phase's lifecycle script when the package declares one.
fn run_script(
    externals: &Externals<'_>,
    action: &Action,
    phase: Phase,
    dir: &Path,
) -> Result<()> {
    let Some(script) = phase.script_name() else {
        return Ok(());
    };
    let package = required_package(action)?;
    if !package.manifest.scripts.contains_key(script) {
        return Ok(());
    }
    externals.lifecycle.run(script, package, dir).map_err(|err| {
        let package = action.label();
        ensure_typed(err, |reason| InstallError::Lifecycle {
            phase: script.to_string(),
            package,
            reason,
        })
    })?;
    Ok(())
}

fn required_package(action: &Action) -> Result<&nodepack_core::ResolvedPackage> {
    action
        .package
        .as_ref()
        .ok_or_else(|| anyhow!("action for {} carries no package record", action.label()))
}

/// Collaborator failures that already carry an install error kind pass
/// through untouched; anything else is classified by the calling phase.
fn ensure_typed(
    err: anyhow::Error,
    classify: impl FnOnce(String) -> InstallError,
) -> anyhow::Error {
    if err.downcast_ref::<InstallError>().is_some() {
        return err;
    }
    classify(format!("{err:#}")).into()
}

/// Puts the tree at `src` into its final slot at `dst`. A rename covers the
/// usual same-filesystem case; across filesystems the tree is copied level
/// by level and the source is dropped afterwards.
fn place_tree(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|err| io_failure(parent, &err))?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let mut pending = VecDeque::from([(src.to_path_buf(), dst.to_path_buf())]);
    while let Some((from_dir, to_dir)) = pending.pop_front() {
        fs::create_dir_all(&to_dir).map_err(|err| io_failure(&to_dir, &err))?;
        for entry in fs::read_dir(&from_dir).map_err(|err| io_failure(&from_dir, &err))? {
            let entry = entry.map_err(|err| io_failure(&from_dir, &err))?;
            let from = entry.path();
            let to = to_dir.join(entry.file_name());
            let file_type = entry.file_type().map_err(|err| io_failure(&from, &err))?;
            if file_type.is_dir() {
                pending.push_back((from, to));
            } else if file_type.is_symlink() {
                copy_link(&from, &to)?;
            } else {
                fs::copy(&from, &to).map_err(|err| io_failure(&from, &err))?;
            }
        }
    }

    fs::remove_dir_all(src).map_err(|err| io_failure(src, &err))?;
    Ok(())
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    let target = fs::read_link(from).map_err(|err| io_failure(from, &err))?;
    std::os::unix::fs::symlink(&target, to).map_err(|err| io_failure(to, &err))?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|err| io_failure(from, &err))?;
    Ok(())
}

fn io_failure(path: &Path, err: &io::Error) -> anyhow::Error {
    InstallError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
    .into()
}
