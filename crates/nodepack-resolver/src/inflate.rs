use std::collections::BTreeMap;

use anyhow::{Context, Result};
use nodepack_core::{LockfileEntry, PackageSpec};
use tracing::debug;

use crate::resolve::MetadataResolver;
use crate::tree::{NodeId, Tree};

/// Builds the subtree under `node` directly from a pinned dependency map.
/// Every entry resolves at its exact version and attaches as a child of
/// `node`; the lockfile is authoritative about shape, so no ancestor
/// deduplication happens and same-name children are replaced.
pub fn inflate_lockfile(
    tree: &mut Tree,
    resolver: &MetadataResolver,
    node: NodeId,
    entries: &BTreeMap<String, LockfileEntry>,
) -> Result<()> {
    let label = tree.node(node).package.label();
    for (name, entry) in entries {
        let spec = PackageSpec::exact(name, &entry.version);
        let context_dir = tree.node(node).realpath.clone();
        let record = resolver.resolve(&spec, &context_dir).with_context(|| {
            format!("failed to inflate pinned dependency '{}' under {label}", spec.raw)
        })?;
        debug!(parent = %label, pinned = %spec.raw, "inflating lockfile entry");

        if let Some(stale) = tree.find_child(node, name) {
            tree.detach_child(node, stale);
        }
        let child = tree.attach_child(node, record, &[node]);
        tree.node_mut(child).loaded = true;

        if !entry.dependencies.is_empty() {
            inflate_lockfile(tree, resolver, child, &entry.dependencies)?;
        }
    }
    Ok(())
}
