use std::collections::BTreeSet;

use anyhow::Result;
use nodepack_core::{InstallError, PackageSpec, SpecKind};

use crate::loader::spec_satisfied_by;
use crate::tree::{module_path, NodeId, Tree};

/// Asserts the structural invariants of a completed ideal tree: placement
/// paths, unique child names, back-reference consistency, acyclic parent
/// chains, recorded dependents, and dependency satisfaction.
pub fn validate_tree(tree: &Tree) -> Result<()> {
    let ids = tree.walk();
    let step_bound = tree.node_count();

    for &id in &ids {
        let node = tree.node(id);
        let label = node.package.label();

        if !tree.is_root(id) {
            let parent = node
                .parent
                .ok_or_else(|| violation(&label, "node is detached from the tree"))?;
            let expected = module_path(&tree.node(parent).path, &node.package.name);
            if node.path != expected {
                return Err(violation(
                    &label,
                    format!(
                        "path {} does not match parent slot {}",
                        node.path.display(),
                        expected.display()
                    ),
                ));
            }
            if node.required_by.is_empty() {
                return Err(violation(&label, "no dependents recorded"));
            }
        }

        let mut seen = BTreeSet::new();
        for &child in &node.children {
            if !seen.insert(tree.name(child)) {
                return Err(violation(
                    &label,
                    format!("duplicate child name '{}'", tree.name(child)),
                ));
            }
            if tree.node(child).parent != Some(id) {
                return Err(violation(
                    &tree.node(child).package.label(),
                    "parent back-reference does not match the owning node",
                ));
            }
        }

        if tree.ancestors(id).take(step_bound + 1).count() > step_bound {
            return Err(violation(&label, "cycle in parent chain"));
        }
    }

    for &id in &ids {
        let package = tree.node(id).package.clone();
        let label = package.label();
        for (dep_name, range) in package.manifest.runtime_dependencies() {
            let Ok(spec) = PackageSpec::named(&dep_name, &range) else {
                continue;
            };
            match find_dependency(tree, id, &dep_name) {
                Some(found) => {
                    let checkable = matches!(spec.kind, SpecKind::Version | SpecKind::Range);
                    if checkable && !spec_satisfied_by(tree, found, &spec) {
                        return Err(violation(
                            &label,
                            format!(
                                "dependency {dep_name}@{range} resolves to non-satisfying {}",
                                tree.node(found).package.label()
                            ),
                        ));
                    }
                }
                None => {
                    if !package.manifest.is_optional(&dep_name) {
                        return Err(violation(
                            &label,
                            format!("dependency {dep_name}@{range} is not satisfied anywhere"),
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

/// First copy of `name` visible from `from`: itself, a sibling at some
/// ancestor, or an ancestor that is the package.
fn find_dependency(tree: &Tree, from: NodeId, name: &str) -> Option<NodeId> {
    for id in tree.ancestors(from) {
        if !tree.is_root(id) && tree.name(id) == name {
            return Some(id);
        }
        if let Some(child) = tree.find_child(id, name) {
            return Some(child);
        }
    }
    None
}

fn violation(node: &str, reason: impl Into<String>) -> anyhow::Error {
    InstallError::Validation {
        node: node.to_string(),
        reason: reason.into(),
    }
    .into()
}
