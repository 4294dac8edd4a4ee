pub mod aabb;
pub mod node;

use crate::octree::node::{NodeKey, OctreeNode};
use slab::Slab;
use std::collections::HashMap;

#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
pub struct NodeId(pub(crate) usize);

/// Flat, slab-backed octree node graph plus the key → node map.
///
/// There is exactly one index per streaming engine; the scheduler and the
/// cache manager borrow it rather than going through shared global state.
/// Nodes are inserted once at hierarchy-parse time and never removed —
/// only their residency state cycles.
#[derive(Clone, Debug)]
pub struct OctreeIndex {
    storage: Slab<OctreeNode>,
    by_key: HashMap<NodeKey, NodeId>,
    root_id: NodeId,
}

impl OctreeIndex {
    pub fn new(root: OctreeNode) -> Self {
        let mut storage = Slab::new();
        let mut by_key = HashMap::new();

        let key = root.key;
        let root_id = NodeId(storage.insert(root));
        storage.get_mut(root_id.0).expect("freshly inserted root").id = Some(root_id);
        by_key.insert(key, root_id);

        Self { storage, by_key, root_id }
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn root(&self) -> &OctreeNode {
        self.storage
            .get(self.root_id.0)
            .expect("root node not found - invariant broken")
    }

    pub fn root_mut(&mut self) -> &mut OctreeNode {
        self.storage
            .get_mut(self.root_id.0)
            .expect("root node not found - invariant broken")
    }

    pub fn node(&self, node_id: NodeId) -> Option<&OctreeNode> {
        self.storage.get(node_id.0)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut OctreeNode> {
        self.storage.get_mut(node_id.0)
    }

    pub fn by_key(&self, key: NodeKey) -> Option<NodeId> {
        self.by_key.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.storage.reserve(additional);
        self.by_key.reserve(additional);
    }

    pub fn insert(&mut self, node: OctreeNode) -> NodeId {
        let key = node.key;
        let id = NodeId(self.storage.insert(node));
        self.storage.get_mut(id.0).expect("freshly inserted node").id = Some(id);
        self.by_key.insert(key, id);
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> {
        self.storage.iter().map(|(i, n)| (NodeId(i), n))
    }

    /// All node ids in the subtree rooted at `node_id`, including it.
    pub fn subtree(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                out.push(id);
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }
}
