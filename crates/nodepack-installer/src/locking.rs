use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nodepack_core::InstallError;
use parking_lot::Mutex;

static HELD_LOCKS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// An exclusive advisory claim on an install location, keyed by
/// `(directory, name)`. The claim is a `<name>.lock` file created with
/// `create_new` plus a process-wide registry entry.
#[derive(Debug)]
pub struct InstallLock {
    file: PathBuf,
}

impl InstallLock {
    pub fn path(&self) -> &Path {
        &self.file
    }
}

pub fn lock(dir: &Path, name: &str) -> Result<InstallLock> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let file = dir.join(format!("{name}.lock"));

    {
        let mut held = HELD_LOCKS.lock();
        if !held.insert(file.clone()) {
            return Err(InstallError::Lock(format!(
                "{} is already held by this process",
                file.display()
            ))
            .into());
        }
    }

    let mut handle = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&file)
    {
        Ok(handle) => handle,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            HELD_LOCKS.lock().remove(&file);
            let owner = fs::read_to_string(&file)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|pid| !pid.is_empty());
            let detail = owner
                .map(|pid| format!(" (held by pid {pid})"))
                .unwrap_or_default();
            return Err(
                InstallError::Lock(format!("{}{detail}", file.display())).into()
            );
        }
        Err(err) => {
            HELD_LOCKS.lock().remove(&file);
            return Err(err)
                .with_context(|| format!("failed to claim install lock: {}", file.display()));
        }
    };

    let write_outcome = handle
        .write_all(format!("{}\n", std::process::id()).as_bytes())
        .and_then(|_| handle.flush());
    if let Err(err) = write_outcome {
        HELD_LOCKS.lock().remove(&file);
        let _ = fs::remove_file(&file);
        return Err(err)
            .with_context(|| format!("failed to write install lock: {}", file.display()));
    }

    Ok(InstallLock { file })
}

pub fn unlock(lock: InstallLock) -> Result<()> {
    HELD_LOCKS.lock().remove(&lock.file);
    match fs::remove_file(&lock.file) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err)
            .with_context(|| format!("failed to release install lock: {}", lock.file.display())),
    }
}
