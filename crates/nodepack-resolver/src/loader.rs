use anyhow::{Context, Result};
use nodepack_core::{range_satisfies, InstallError, PackageSpec, Requested, SpecKind};
use semver::Version;
use tracing::{debug, warn};

use crate::inflate::inflate_lockfile;
use crate::resolve::MetadataResolver;
use crate::tree::{NodeId, Tree};

/// Places each explicit install target at the root, then expands their
/// dependencies. Placement of all targets happens before any expansion so
/// the targets claim root slots ahead of their transitives.
pub fn load_args(tree: &mut Tree, resolver: &MetadataResolver, args: &[PackageSpec]) -> Result<()> {
    let root = tree.root();
    let mut pending = Vec::new();
    for spec in args {
        let placed = add_child(tree, resolver, root, spec)
            .with_context(|| format!("failed to install '{}'", spec.raw))?;
        if let Some(node) = placed {
            pending.push((spec.raw.clone(), node));
        }
    }
    for (raw, node) in pending {
        load_deps(tree, resolver, node)
            .with_context(|| format!("failed to install '{raw}'"))?;
    }
    Ok(())
}

/// Expands the declared runtime dependencies of `node` into the tree. All
/// dependencies are placed first, in declaration order, then each placed
/// subtree is expanded; a sibling therefore claims its slot before any
/// deeper requirement can. Failures under a name declared optional are
/// downgraded to warnings and the partial subtree, if any, is detached.
pub fn load_deps(tree: &mut Tree, resolver: &MetadataResolver, node: NodeId) -> Result<()> {
    let package = tree.node(node).package.clone();
    let label = package.label();

    let mut pending = Vec::new();
    for (dep_name, range) in package.manifest.runtime_dependencies() {
        let placed = PackageSpec::named(&dep_name, &range)
            .and_then(|spec| add_child(tree, resolver, node, &spec));
        match placed {
            Ok(Some(child)) => pending.push((dep_name, child)),
            Ok(None) => {}
            Err(err) => {
                if package.manifest.is_optional(&dep_name) {
                    warn_optional(&label, dep_name, &err);
                    continue;
                }
                return Err(err)
                    .with_context(|| format!("while loading dependencies of {label}"));
            }
        }
    }

    for (dep_name, child) in pending {
        if let Err(err) = load_deps(tree, resolver, child) {
            if package.manifest.is_optional(&dep_name) {
                discard_optional_subtree(tree, node, child);
                warn_optional(&label, dep_name, &err);
                continue;
            }
            return Err(err).with_context(|| format!("while loading dependencies of {label}"));
        }
    }
    Ok(())
}

/// Places the root's dev dependencies that do not overlap its runtime
/// dependencies. The parent link of each placed dev node is detached while
/// its subtree expands, so dev-only transitives resolve against the subtree
/// alone instead of hoisting across runtime code.
pub fn load_dev_deps(tree: &mut Tree, resolver: &MetadataResolver) -> Result<()> {
    let root = tree.root();
    let package = tree.node(root).package.clone();
    let label = package.label();
    let runtime = package.manifest.runtime_dependencies();

    let mut pending = Vec::new();
    for (dep_name, range) in &package.manifest.dev_dependencies {
        if runtime.contains_key(dep_name) {
            continue;
        }
        let spec = PackageSpec::named(dep_name, range)
            .with_context(|| format!("invalid dev dependency declaration in {label}"))?;
        let placed = add_child(tree, resolver, root, &spec)
            .with_context(|| format!("failed to install dev dependency '{}'", spec.raw))?;
        if let Some(node) = placed {
            pending.push((spec.raw, node));
        }
    }

    for (raw, node) in pending {
        let original_parent = tree.node(node).parent;
        tree.set_parent(node, None);
        let outcome = load_deps(tree, resolver, node);
        tree.set_parent(node, original_parent);
        outcome.with_context(|| format!("failed to install dev dependency '{raw}'"))?;
    }
    Ok(())
}

/// Resolves `spec` and places it relative to `target`, hoisting to the
/// earliest installable ancestor. Returns the node whose dependencies still
/// need expanding, or `None` when nothing further is required.
pub fn add_child(
    tree: &mut Tree,
    resolver: &MetadataResolver,
    target: NodeId,
    spec: &PackageSpec,
) -> Result<Option<NodeId>> {
    let context_dir = tree.node(target).realpath.clone();
    let record = resolver.resolve(spec, &context_dir)?;
    let name = record.name.clone();

    if let Some(existing) = requirement_exists(tree, target, &name, spec) {
        if !tree.node(existing).required_by.contains(&target) {
            tree.node_mut(existing).required_by.push(target);
        }
        merge_requested(tree, existing, record.requested.as_ref());
        if tree.node(existing).loaded {
            return Ok(None);
        }
        tree.node_mut(existing).loaded = true;
        let shrinkwrap = tree.node(existing).package.manifest.shrinkwrap.clone();
        if let Some(lockfile) = shrinkwrap {
            inflate_lockfile(tree, resolver, existing, &lockfile.dependencies)?;
            return Ok(None);
        }
        return Ok(Some(existing));
    }

    let parent = earliest_installable(tree, target, &name);
    if let Some(stale) = tree.find_child(parent, &name) {
        debug!(
            name = %name,
            old = %tree.node(stale).package.version,
            new = %record.version,
            "replacing conflicting copy"
        );
        tree.detach_child(parent, stale);
    }

    let shrinkwrap = record.manifest.shrinkwrap.clone();
    let node = tree.attach_child(parent, record, &[target]);
    tree.node_mut(node).loaded = true;
    if let Some(lockfile) = shrinkwrap {
        inflate_lockfile(tree, resolver, node, &lockfile.dependencies)?;
        return Ok(None);
    }
    Ok(Some(node))
}

/// Walks from `from` toward the root looking for an existing copy of `name`
/// that satisfies `spec`. A copy found along the chain that does not satisfy
/// blocks the search; a new copy must then be placed around it.
pub fn requirement_exists(
    tree: &Tree,
    from: NodeId,
    name: &str,
    spec: &PackageSpec,
) -> Option<NodeId> {
    for id in tree.ancestors(from) {
        if !tree.is_root(id) && tree.name(id) == name {
            return spec_satisfied_by(tree, id, spec).then_some(id);
        }
        if let Some(child) = tree.find_child(id, name) {
            return spec_satisfied_by(tree, child, spec).then_some(child);
        }
    }
    None
}

/// The highest ancestor of `from` that a new copy of `name` can be hoisted
/// to: the walk stops below the first ancestor that already holds a
/// conflicting child, and nests under an ancestor that itself is `name`.
pub fn earliest_installable(tree: &Tree, from: NodeId, name: &str) -> NodeId {
    let mut best = from;
    let mut cursor = tree.node(from).parent;
    while let Some(ancestor) = cursor {
        if !tree.is_root(ancestor) && tree.name(ancestor) == name {
            return ancestor;
        }
        if tree.find_child(ancestor, name).is_some() {
            return best;
        }
        best = ancestor;
        cursor = tree.node(ancestor).parent;
    }
    best
}

/// Whether the package at `node` satisfies `spec`. Exact versions compare
/// equal, ranges go through semver, and locator kinds satisfy only a node
/// requested under the same locator.
pub fn spec_satisfied_by(tree: &Tree, node: NodeId, spec: &PackageSpec) -> bool {
    let package = &tree.node(node).package;
    match spec.kind {
        SpecKind::Version => Version::parse(&spec.target)
            .map(|version| version == package.version)
            .unwrap_or(false),
        SpecKind::Range => range_satisfies(&spec.target, &package.version),
        _ => package
            .requested
            .as_ref()
            .map(|requested| requested.spec == spec.target)
            .unwrap_or(false),
    }
}

fn merge_requested(tree: &mut Tree, existing: NodeId, incoming: Option<&Requested>) {
    let Some(incoming) = incoming else { return };
    let node = tree.node_mut(existing);
    if let Some(current) = node.package.requested.as_mut() {
        current.merge(incoming);
        return;
    }

    let satisfied = match incoming.kind {
        SpecKind::Version => Version::parse(&incoming.spec)
            .map(|version| version == node.package.version)
            .unwrap_or(false),
        SpecKind::Range => range_satisfies(&incoming.spec, &node.package.version),
        _ => false,
    };
    let adopted = if satisfied {
        incoming.clone()
    } else {
        Requested::pinned(&node.package.version)
    };
    node.package.requested = Some(adopted);
}

fn warn_optional(requirer: &str, dep_name: String, err: &anyhow::Error) {
    let failure = InstallError::OptionalFailure {
        spec: dep_name,
        reason: format!("{err:#}"),
    };
    warn!(package = %requirer, "{failure}; subtree skipped");
}

fn discard_optional_subtree(tree: &mut Tree, requirer: NodeId, child: NodeId) {
    let node = tree.node(child);
    let sole_requirer = node.required_by == [requirer];
    if let (Some(parent), true) = (node.parent, sole_requirer) {
        tree.detach_child(parent, child);
    }
}
