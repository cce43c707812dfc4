mod current;
mod decompose;
mod install;
mod layout;
mod locking;
mod schedule;

pub use current::read_current_tree;
pub use decompose::{decompose, InstallPlan, Phase, PlanStep};
pub use install::{install, install_at, InstallOptions, InstallSummary};
pub use layout::{
    default_global_prefix, global_install_root, ProjectLayout, LOCKFILE_FILE, MANIFEST_FILE,
    STAGING_DIR,
};
pub use locking::{lock, unlock, InstallLock};
pub use schedule::{execute_plan, Externals, PAYLOAD_DIR, TARBALL_FILE};
