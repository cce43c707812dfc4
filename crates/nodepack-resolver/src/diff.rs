use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use nodepack_core::ResolvedPackage;
use semver::Version;

use crate::tree::{NodeId, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Add,
    Remove,
    Move,
    Update,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Move => "move",
            Self::Update => "update",
        }
    }
}

/// One step of the install plan. Owns everything the scheduler needs so the
/// plan outlives both trees.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub name: String,
    pub version: Version,
    pub old_version: Option<Version>,
    pub path: PathBuf,
    pub from_path: Option<PathBuf>,
    pub package: Option<ResolvedPackage>,
}

impl Action {
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Compares the current tree against the ideal tree by structural position
/// and emits the minimal ordered action list: removals bottom-up, then
/// additions (with moves and updates) top-down, name-stable within a level.
pub fn diff_trees(current: &Tree, ideal: &Tree) -> Vec<Action> {
    let current_index = index_by_path(current);
    let ideal_index = index_by_path(ideal);

    let mut adds = Vec::new();
    let mut updates = Vec::new();
    let mut removes = Vec::new();

    for (path, &id) in &ideal_index {
        let node = ideal.node(id);
        match current_index.get(path) {
            None => adds.push(action(ActionKind::Add, ideal, id, None)),
            Some(&existing) => {
                let on_disk = current.node(existing);
                if on_disk.package.name == node.package.name
                    && on_disk.package.version == node.package.version
                {
                    continue;
                }
                updates.push(action(
                    ActionKind::Update,
                    ideal,
                    id,
                    Some(on_disk.package.version.clone()),
                ));
            }
        }
    }

    for (path, &id) in &current_index {
        if !ideal_index.contains_key(path) {
            removes.push(action(ActionKind::Remove, current, id, None));
        }
    }

    let (moves, mut adds, mut removes) = pair_moves(adds, removes);

    removes.sort_by(|a, b| depth(&b.path).cmp(&depth(&a.path)).then(a.path.cmp(&b.path)));

    let mut additions: Vec<Action> = Vec::new();
    additions.extend(moves);
    additions.extend(adds.drain(..));
    additions.extend(updates);
    additions.sort_by(|a, b| depth(&a.path).cmp(&depth(&b.path)).then(a.path.cmp(&b.path)));

    removes.extend(additions);
    removes
}

fn index_by_path(tree: &Tree) -> BTreeMap<PathBuf, NodeId> {
    tree.walk()
        .into_iter()
        .filter(|&id| !tree.is_root(id))
        .map(|id| (tree.node(id).path.clone(), id))
        .collect()
}

fn action(kind: ActionKind, tree: &Tree, id: NodeId, old_version: Option<Version>) -> Action {
    let node = tree.node(id);
    Action {
        kind,
        name: node.package.name.clone(),
        version: node.package.version.clone(),
        old_version,
        path: node.path.clone(),
        from_path: None,
        package: Some(node.package.clone()),
    }
}

/// Pairs each pending addition with a pending removal of the same package at
/// another path, turning the pair into a single `move`.
fn pair_moves(
    adds: Vec<Action>,
    removes: Vec<Action>,
) -> (Vec<Action>, Vec<Action>, Vec<Action>) {
    let mut candidates: BTreeMap<(String, Version), VecDeque<Action>> = BTreeMap::new();
    for remove in removes {
        candidates
            .entry((remove.name.clone(), remove.version.clone()))
            .or_default()
            .push_back(remove);
    }

    let mut moves = Vec::new();
    let mut kept_adds = Vec::new();
    for add in adds {
        let key = (add.name.clone(), add.version.clone());
        let paired = candidates
            .get_mut(&key)
            .and_then(|pending| pending.pop_front());
        match paired {
            Some(removed) => moves.push(Action {
                kind: ActionKind::Move,
                from_path: Some(removed.path),
                ..add
            }),
            None => kept_adds.push(add),
        }
    }

    let kept_removes = candidates.into_values().flatten().collect();
    (moves, kept_adds, kept_removes)
}

fn depth(path: &std::path::Path) -> usize {
    path.components().count()
}
