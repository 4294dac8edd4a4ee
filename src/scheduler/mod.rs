pub mod subsample;

use crate::camera::CameraState;
use crate::filter::FilterSet;
use crate::octree::node::NodeState;
use crate::octree::{NodeId, OctreeIndex};
use std::collections::VecDeque;
use tracing::trace;

/// Pass-through knobs from the UI layer; nothing here has a hidden
/// internal override.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraversalConfig {
    pub point_budget: u64,
    /// Refinement is forced through the first levels so the initial paint
    /// is never a single coarse node.
    pub min_depth: u8,
    /// Hard recursion stop regardless of screen-space error.
    pub max_depth: u8,
    /// Base screen-space-error threshold; scaled with depth.
    pub refine_threshold: f64,
    pub frustum_culling: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            point_budget: 5_000_000,
            min_depth: 2,
            max_depth: 16,
            refine_threshold: 0.4,
            frustum_culling: true,
        }
    }
}

impl TraversalConfig {
    /// Deeper nodes must loom proportionally larger on screen before they
    /// refine further.
    fn refine_threshold_at(&self, depth: u8) -> f64 {
        self.refine_threshold * (depth as f64 + 1.0)
    }
}

/// One state transition decided by a traversal pass. The cache manager
/// executes these; the scheduler itself never mutates the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Fetch and parse the hierarchy page behind a proxy node.
    LoadPage(NodeId),
    /// Fetch, decode and commit a node's points.
    Load(NodeId),
    /// Release a node's points.
    Unload(NodeId),
}

/// Output of one traversal pass over the whole tree.
#[derive(Debug, Default)]
pub struct TraversalPlan {
    pub actions: Vec<Action>,
    /// Points that will be resident once the plan is executed.
    pub committed_points: u64,
    pub visited: usize,
    /// Nodes skipped because the budget was exhausted — a normal outcome,
    /// kept distinguishable from load failures.
    pub budget_deferred: usize,
}

impl TraversalPlan {
    pub fn page_loads(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.actions.iter().filter_map(|a| match a {
            Action::LoadPage(id) => Some(*id),
            _ => None,
        })
    }

    pub fn loads(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.actions.iter().filter_map(|a| match a {
            Action::Load(id) => Some(*id),
            _ => None,
        })
    }

    pub fn unloads(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.actions.iter().filter_map(|a| match a {
            Action::Unload(id) => Some(*id),
            _ => None,
        })
    }
}

/// Walks the node graph breadth-first from the root and decides, per node:
/// bounds rejection, frustum rejection, refinement, then the budget-guarded
/// load decision. Subtree pruning always happens before child recursion,
/// so a rejected subtree never schedules a fetch. The breadth-first
/// frontier makes coarse ancestor detail win over cherry-picked fine
/// detail when the budget is tight.
pub fn plan(
    index: &OctreeIndex,
    camera: Option<&CameraState>,
    filters: &FilterSet,
    config: &TraversalConfig,
) -> TraversalPlan {
    let frustum = if config.frustum_culling { camera.map(CameraState::frustum) } else { None };

    let mut plan = TraversalPlan::default();
    let mut queue = VecDeque::new();
    queue.push_back(index.root_id());

    while let Some(id) = queue.pop_front() {
        let Some(node) = index.node(id) else { continue };
        plan.visited += 1;

        // 1. bounds rejection prunes the whole subtree
        if !filters.intersects_node(&node.bounding_box) {
            unload_subtree(index, id, &mut plan);
            continue;
        }

        // 2. visibility rejection
        if let Some(frustum) = &frustum {
            if !frustum.intersects_aabb(&node.bounding_box) {
                unload_subtree(index, id, &mut plan);
                continue;
            }
        }

        // children unknown: schedule the hierarchy page, revisit next pass
        if node.needs_hierarchy() {
            plan.actions.push(Action::LoadPage(id));
            continue;
        }

        // 3. refinement decision
        let depth = node.depth();
        let refine = depth < config.max_depth
            && !node.children.is_empty()
            && (depth < config.min_depth
                || screen_space_error(camera, &node.bounding_box)
                    > config.refine_threshold_at(depth));

        // 4. load decision; refined interior nodes stay resident as the
        // coarse fallback
        match node.state {
            NodeState::Loaded => {
                // a shrunk budget evicts the deepest-visited residents first
                if plan.committed_points + node.num_points as u64 <= config.point_budget {
                    plan.committed_points += node.num_points as u64;
                } else {
                    plan.actions.push(Action::Unload(id));
                    plan.budget_deferred += 1;
                }
            }
            // in flight from an earlier pass; Loading is the mutual
            // exclusion flag, never re-trigger
            NodeState::Loading => {}
            NodeState::Unloaded if node.num_points > 0 => {
                if plan.committed_points + node.num_points as u64 <= config.point_budget {
                    plan.actions.push(Action::Load(id));
                    plan.committed_points += node.num_points as u64;
                } else {
                    trace!(node = node.name.as_str(), "budget exhausted, leaving unrefined");
                    plan.budget_deferred += 1;
                }
            }
            NodeState::Unloaded => {}
        }

        if refine {
            queue.extend(node.children.iter().copied());
        } else {
            // detail below this node is no longer wanted
            for &child in &node.children {
                unload_subtree(index, child, &mut plan);
            }
        }
    }

    plan
}

/// `node_size / distance-to-camera` proxy. Without a camera the error is
/// zero, so traversal depth is governed by `min_depth` alone.
fn screen_space_error(camera: Option<&CameraState>, bounding_box: &crate::octree::aabb::Aabb) -> f64 {
    match camera {
        Some(camera) => {
            let distance = bounding_box.center().distance(camera.position);
            if distance <= f64::EPSILON {
                f64::MAX
            } else {
                bounding_box.max_extent() / distance
            }
        }
        None => 0.0,
    }
}

fn unload_subtree(index: &OctreeIndex, root: NodeId, plan: &mut TraversalPlan) {
    for id in index.subtree(root) {
        if let Some(node) = index.node(id) {
            if node.state == NodeState::Loaded {
                plan.actions.push(Action::Unload(id));
            }
        }
    }
}
