use std::path::{Path, PathBuf};

use nodepack_core::ResolvedPackage;

pub const MODULES_DIR: &str = "node_modules";

/// Index of a node inside its [`Tree`] arena. Stable for the lifetime of the
/// tree; detached nodes keep their slot but drop out of every walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub package: ResolvedPackage,
    pub path: PathBuf,
    pub realpath: PathBuf,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub required_by: Vec<NodeId>,
    pub loaded: bool,
}

/// Arena-backed package tree. `children` is the only ownership edge;
/// `parent` and `required_by` are index back-references.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(root_package: ResolvedPackage, root_path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = root_path.into();
        Self {
            nodes: vec![Node {
                package: root_package,
                realpath: path.clone(),
                path,
                parent: None,
                children: Vec::new(),
                required_by: Vec::new(),
                loaded: false,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id.0 == 0
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).package.name
    }

    /// Arena capacity, counting detached slots. Used as a step bound when
    /// walking back-references.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn attach_child(
        &mut self,
        parent: NodeId,
        package: ResolvedPackage,
        required_by: &[NodeId],
    ) -> NodeId {
        let path = module_path(&self.node(parent).path, &package.name);
        let realpath = module_path(&self.node(parent).realpath, &package.name);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            package,
            path,
            realpath,
            parent: Some(parent),
            children: Vec::new(),
            required_by: required_by.to_vec(),
            loaded: false,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn detach_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|&existing| existing != child);
        self.nodes[child.0].parent = None;
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.name(child) == name)
    }

    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.nodes[id.0].parent = parent;
    }

    /// The chain from `from` to the root, `from` included.
    pub fn ancestors(&self, from: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(from), move |&id| self.node(id).parent)
    }

    /// Preorder walk of every attached node, root first, children in
    /// insertion order.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            visited.push(id);
            for &child in self.node(id).children.iter().rev() {
                stack.push(child);
            }
        }
        visited
    }

    pub fn mark_all_loaded(&mut self) {
        for node in &mut self.nodes {
            node.loaded = true;
        }
    }
}

pub fn module_path(parent: &Path, name: &str) -> PathBuf {
    let mut path = parent.join(MODULES_DIR);
    for part in name.split('/') {
        path.push(part);
    }
    path
}
