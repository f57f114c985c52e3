//! Cut-point selection shared by mutation and crossover.
//!
//! Both operators walk from the root to the node they edit, rebuilding only the
//! nodes on that path; every sibling subtree is shared with the input tree.

use crate::grammar::Grammar;
use crate::random::RandomSource;
use crate::tree::{NodeKind, Site, TreeNode, Value};
use std::sync::Arc;

/// Budget left to the children of `node` when it sits at `site` with `budget`.
pub(crate) fn child_budget(grammar: &Grammar, site: &Site<'_>, node: &TreeNode, budget: i32) -> i32 {
    let cost = match node.kind() {
        NodeKind::Production(concrete) => grammar.expansion_cost(site.ty, *concrete) as i32,
        NodeKind::List(_) => 0,
    };
    budget - cost - 1
}

fn selection_weight(node: &TreeNode, depth_aware: bool) -> usize {
    if depth_aware {
        node.weighted_node_count()
    } else {
        node.node_count()
    }
}

/// Share of the selection weight that lands on `node` itself rather than its descendants.
fn own_weight(node: &TreeNode, depth_aware: bool) -> usize {
    if depth_aware {
        node.distance_to_terminal().saturating_add(1)
    } else {
        1
    }
}

/// Walks down from `node`, drawing a fresh number at every level, and applies
/// `edit` at the chosen point. Uniform selection gives every node the same
/// chance; depth-aware selection weights each node by its distance to terminal.
pub(crate) fn edit_random_point<F>(
    r: &mut dyn RandomSource,
    grammar: &Grammar,
    node: &Arc<TreeNode>,
    site: Site<'_>,
    budget: i32,
    depth_aware: bool,
    edit: &mut F,
) -> Arc<TreeNode>
where
    F: FnMut(&mut dyn RandomSource, &Arc<TreeNode>, Site<'_>, i32) -> Arc<TreeNode>,
{
    let counter = selection_weight(node, depth_aware);
    let mut c = r.randint(0, counter as i64 - 1) as usize;
    let own = own_weight(node, depth_aware);
    if c < own {
        return edit(r, node, site, budget);
    }

    c -= own;
    let inner_budget = child_budget(grammar, &site, node, budget);
    for (position, value) in node.init_values().iter().enumerate() {
        let Value::Node(child) = value else {
            continue;
        };
        let count = selection_weight(child, depth_aware);
        if c < count {
            let Some(child_site) = node.child_site(grammar, position) else {
                break;
            };
            let edited = edit_random_point(r, grammar, child, child_site, inner_budget, depth_aware, edit);
            return node.with_value(grammar, position, Value::Node(edited));
        }
        c -= count;
    }
    Arc::clone(node)
}

/// Nodes of exactly `kind` in the subtree rooted at `node` (itself included) whose
/// depth fits `max_depth`.
pub(crate) fn count_exact(node: &TreeNode, kind: &NodeKind, max_depth: usize) -> usize {
    let own = usize::from(node.kind() == kind && node.depth() <= max_depth);
    own + node
        .subtrees_of(kind)
        .iter()
        .filter(|n| n.depth() <= max_depth)
        .count()
}

/// Applies `edit` at the `n`-th (1-based, pre-order) occurrence counted by `count_exact`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn edit_at_occurrence<F>(
    grammar: &Grammar,
    node: &Arc<TreeNode>,
    site: Site<'_>,
    budget: i32,
    kind: &NodeKind,
    max_depth: usize,
    mut n: usize,
    edit: &mut F,
) -> Arc<TreeNode>
where
    F: FnMut(&Arc<TreeNode>, Site<'_>, i32) -> Arc<TreeNode>,
{
    if node.kind() == kind && node.depth() <= max_depth {
        if n <= 1 {
            return edit(node, site, budget);
        }
        n -= 1;
    }

    let inner_budget = child_budget(grammar, &site, node, budget);
    for (position, value) in node.init_values().iter().enumerate() {
        let Value::Node(child) = value else {
            continue;
        };
        let here = count_exact(child, kind, max_depth);
        if n <= here {
            let Some(child_site) = node.child_site(grammar, position) else {
                break;
            };
            let edited =
                edit_at_occurrence(grammar, child, child_site, inner_budget, kind, max_depth, n, edit);
            return node.with_value(grammar, position, Value::Node(edited));
        }
        n -= here;
    }
    Arc::clone(node)
}
