mod diff;
mod inflate;
mod loader;
mod resolve;
mod tree;
mod validate;

pub use diff::{diff_trees, Action, ActionKind};
pub use inflate::inflate_lockfile;
pub use loader::{
    add_child, earliest_installable, load_args, load_deps, load_dev_deps, requirement_exists,
    spec_satisfied_by,
};
pub use resolve::MetadataResolver;
pub use tree::{module_path, Node, NodeId, Tree, MODULES_DIR};
pub use validate::validate_tree;

#[cfg(test)]
mod tests;
