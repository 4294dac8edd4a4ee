use crate::octree::node::{NodeState, PointBlock};
use crate::octree::{NodeId, OctreeIndex};
use tracing::{debug, trace};

/// Owns node residency: state transitions, the resident-point total, and
/// the generation counter that fences stale decode results.
///
/// Filters are applied during decode, so any filter or appearance change
/// invalidates every loaded node; the next traversal pass reloads with
/// the new predicate applied. That trades reload cost for correctness.
#[derive(Debug, Default)]
pub struct NodeCache {
    resident_points: u64,
    loaded_nodes: usize,
    generation: u64,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Σ `num_points` over Loaded nodes. The scheduler keeps this at or
    /// under the point budget.
    pub fn resident_points(&self) -> u64 {
        self.resident_points
    }

    pub fn loaded_nodes(&self) -> usize {
        self.loaded_nodes
    }

    /// Current filter/appearance generation. Decode results carry the
    /// generation they were started under and are discarded on mismatch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Releases a node's points. Idempotent: unloading an Unloaded node is
    /// a no-op. A Loading node reverts to Unloaded, which makes its
    /// in-flight result uncommittable.
    pub fn unload_node(&mut self, index: &mut OctreeIndex, id: NodeId) {
        let Some(node) = index.node_mut(id) else { return };
        match node.state {
            NodeState::Loaded => {
                node.state = NodeState::Unloaded;
                node.block = None;
                self.resident_points = self.resident_points.saturating_sub(node.num_points as u64);
                self.loaded_nodes = self.loaded_nodes.saturating_sub(1);
                trace!(node = node.name.as_str(), "unloaded");
            }
            NodeState::Loading => {
                node.state = NodeState::Unloaded;
            }
            NodeState::Unloaded => {}
        }
    }

    /// Unloads every resident node and bumps the generation, fencing out
    /// any in-flight decode started before the change.
    pub fn invalidate_all(&mut self, index: &mut OctreeIndex) {
        let ids: Vec<NodeId> = index
            .iter()
            .filter(|(_, n)| n.state != NodeState::Unloaded)
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            self.unload_node(index, id);
        }
        self.generation += 1;
        debug!(generation = self.generation, "cache invalidated");
    }

    /// Claims a node for loading. Returns the generation ticket to present
    /// at commit, or `None` when the node is not in a loadable state —
    /// `Loading` acts as the mutual-exclusion flag.
    pub fn begin_load(&mut self, index: &mut OctreeIndex, id: NodeId) -> Option<u64> {
        let node = index.node_mut(id)?;
        if node.state != NodeState::Unloaded {
            return None;
        }
        node.state = NodeState::Loading;
        Some(self.generation)
    }

    /// Commits a decoded block. Rejected (and the node returned to
    /// Unloaded) when the node is no longer Loading or the ticket is from
    /// a superseded generation — the newest request wins.
    pub fn commit(
        &mut self,
        index: &mut OctreeIndex,
        id: NodeId,
        ticket: u64,
        block: PointBlock,
    ) -> bool {
        let Some(node) = index.node_mut(id) else { return false };
        if node.state != NodeState::Loading || ticket != self.generation {
            if node.state == NodeState::Loading {
                node.state = NodeState::Unloaded;
            }
            trace!(node = node.name.as_str(), ticket, current = self.generation, "stale decode discarded");
            return false;
        }
        node.state = NodeState::Loaded;
        node.generation = ticket;
        node.block = Some(block);
        self.resident_points += node.num_points as u64;
        self.loaded_nodes += 1;
        true
    }

    /// Returns a failed load to Unloaded so the next full pass may retry
    /// it; there is no automatic retry loop.
    pub fn abort_load(&mut self, index: &mut OctreeIndex, id: NodeId) {
        if let Some(node) = index.node_mut(id) {
            if node.state == NodeState::Loading {
                node.state = NodeState::Unloaded;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::aabb::Aabb;
    use crate::octree::node::{NodeKey, OctreeNode};
    use glam::DVec3;

    fn index_with_root(points: u32) -> OctreeIndex {
        OctreeIndex::new(OctreeNode {
            key: NodeKey::ROOT,
            name: "r".to_string(),
            bounding_box: Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0)),
            num_points: points,
            ..Default::default()
        })
    }

    fn block_of(points: usize) -> PointBlock {
        let mut block = PointBlock::default();
        for i in 0..points {
            block.push(0.0, 0.0, 0.0, 0, 0, i as f64, [0, 0, 0]);
        }
        block
    }

    #[test]
    fn load_commit_accounts_points() {
        let mut index = index_with_root(100);
        let mut cache = NodeCache::new();
        let root = index.root_id();

        let ticket = cache.begin_load(&mut index, root).unwrap();
        assert!(cache.commit(&mut index, root, ticket, block_of(90)));
        assert_eq!(cache.resident_points(), 100);
        assert_eq!(cache.loaded_nodes(), 1);
        assert_eq!(index.root().state, NodeState::Loaded);
    }

    #[test]
    fn unload_is_idempotent() {
        let mut index = index_with_root(100);
        let mut cache = NodeCache::new();
        let root = index.root_id();
        let ticket = cache.begin_load(&mut index, root).unwrap();
        cache.commit(&mut index, root, ticket, block_of(100));

        cache.unload_node(&mut index, root);
        let after_once = (cache.resident_points(), cache.loaded_nodes(), index.root().state);
        cache.unload_node(&mut index, root);
        let after_twice = (cache.resident_points(), cache.loaded_nodes(), index.root().state);

        assert_eq!(after_once, (0, 0, NodeState::Unloaded));
        assert_eq!(after_once, after_twice);
        assert!(index.root().block.is_none());
    }

    #[test]
    fn loading_is_mutually_exclusive() {
        let mut index = index_with_root(10);
        let mut cache = NodeCache::new();
        let root = index.root_id();
        assert!(cache.begin_load(&mut index, root).is_some());
        assert!(cache.begin_load(&mut index, root).is_none());
    }

    #[test]
    fn stale_generation_commit_is_discarded() {
        let mut index = index_with_root(10);
        let mut cache = NodeCache::new();
        let root = index.root_id();

        let ticket = cache.begin_load(&mut index, root).unwrap();
        // a filter change lands while the decode is in flight
        cache.invalidate_all(&mut index);
        assert!(!cache.commit(&mut index, root, ticket, block_of(10)));
        assert_eq!(cache.resident_points(), 0);
        assert_eq!(index.root().state, NodeState::Unloaded);

        // the next pass reloads under the new generation
        let ticket = cache.begin_load(&mut index, root).unwrap();
        assert!(cache.commit(&mut index, root, ticket, block_of(10)));
    }

    #[test]
    fn invalidate_all_unloads_everything() {
        let mut index = index_with_root(10);
        let child_key = NodeKey::ROOT.child(1);
        let child = index.insert(OctreeNode {
            key: child_key,
            name: child_key.name(),
            num_points: 5,
            ..Default::default()
        });
        index.root_mut().children = vec![child];

        let mut cache = NodeCache::new();
        let root = index.root_id();
        for id in [root, child] {
            let t = cache.begin_load(&mut index, id).unwrap();
            cache.commit(&mut index, id, t, block_of(1));
        }
        assert_eq!(cache.loaded_nodes(), 2);

        let generation_before = cache.generation();
        cache.invalidate_all(&mut index);
        assert_eq!(cache.loaded_nodes(), 0);
        assert_eq!(cache.resident_points(), 0);
        assert_eq!(cache.generation(), generation_before + 1);
    }

    #[test]
    fn aborted_load_can_retry_next_pass() {
        let mut index = index_with_root(10);
        let mut cache = NodeCache::new();
        let root = index.root_id();
        cache.begin_load(&mut index, root).unwrap();
        cache.abort_load(&mut index, root);
        assert_eq!(index.root().state, NodeState::Unloaded);
        assert!(cache.begin_load(&mut index, root).is_some());
    }
}
