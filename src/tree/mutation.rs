use crate::config::TreeConfig;
use crate::grammar::{Grammar, SymbolId, ValueType};
use crate::random::{self, RandomSource};
use crate::tree::builder::TreeBuilder;
use crate::tree::selection::{self, child_budget, count_exact};
use crate::tree::{MAX_REGENERATION_ATTEMPTS, NodeKind, Site, Tree, TreeNode, Value};
use log::{debug, trace};
use std::sync::Arc;

/// Subtree-replacement mutation over trees rooted at a fixed target type.
#[derive(Debug, Clone)]
pub struct TreeMutator<'a> {
    builder: TreeBuilder<'a>,
    target: ValueType,
    depth_aware: bool,
}

impl<'a> TreeMutator<'a> {
    /// Creates a new `TreeMutator`
    ///
    /// # Arguments
    /// * `builder` - Builder used for every regenerated subtree
    /// * `target` - Declared type of the roots being mutated
    ///
    /// # Returns
    /// `TreeMutator`, depth-aware when the builder's config asks for it
    pub fn new(builder: TreeBuilder<'a>, target: SymbolId) -> Self {
        Self {
            depth_aware: builder.config().depth_aware_mutation,
            builder,
            target: ValueType::Symbol(target),
        }
    }

    fn grammar(&self) -> &'a Grammar {
        self.builder.grammar()
    }

    fn config(&self) -> &'a TreeConfig {
        self.builder.config()
    }

    /// Returns a mutated copy of `tree`. The input is never modified, and the
    /// result never exceeds the configured max depth.
    pub fn mutate(&self, r: &mut dyn RandomSource, tree: &Tree) -> Tree {
        let site = Site::root(&self.target);
        self.mutate_inner(r, tree, site, self.config().max_depth, false)
    }

    /// Mutation starting at `node`, which sits at `site` with `budget` depth left.
    /// With `force` set the node itself is replaced; otherwise a point below it is drawn.
    pub(crate) fn mutate_inner(
        &self,
        r: &mut dyn RandomSource,
        node: &Arc<TreeNode>,
        site: Site<'_>,
        budget: i32,
        force: bool,
    ) -> Arc<TreeNode> {
        if force {
            return self.replace(r, node, site, budget);
        }
        selection::edit_random_point(r, self.grammar(), node, site, budget, self.depth_aware, &mut |r, n, s, b| {
            self.replace(r, n, s, b)
        })
    }

    /// Biases mutation toward occurrences of the production `specific`. One time in
    /// three, and whenever the tree holds no such occurrence, this is plain `mutate`.
    pub fn mutate_specific_type(&self, r: &mut dyn RandomSource, tree: &Tree, specific: SymbolId) -> Tree {
        let kind = NodeKind::Production(specific);
        let max_depth = self.config().max_depth.max(0) as usize;
        let fallback = r.randint(0, 2) > 0;
        let options = count_exact(tree, &kind, max_depth);
        if fallback || options == 0 {
            return self.mutate(r, tree);
        }

        let n = r.randint(1, options as i64) as usize;
        trace!("Forcing mutation at occurrence {} of {}", n, self.grammar().name(specific));
        selection::edit_at_occurrence(
            self.grammar(),
            tree,
            Site::root(&self.target),
            self.config().max_depth,
            &kind,
            max_depth,
            n,
            &mut |node, site, budget| self.replace(r, node, site, budget),
        )
    }

    /// Replacement at a chosen point: a metahandler-driven field mutation when any
    /// field supports one, otherwise a freshly generated subtree.
    fn replace(&self, r: &mut dyn RandomSource, node: &Arc<TreeNode>, site: Site<'_>, budget: i32) -> Arc<TreeNode> {
        if let Some(mutated) = self.mutate_field(r, node, &site, budget) {
            return mutated;
        }
        regenerate(r, &self.builder, node, site, budget)
    }

    fn mutate_field(
        &self,
        r: &mut dyn RandomSource,
        node: &Arc<TreeNode>,
        site: &Site<'_>,
        budget: i32,
    ) -> Option<Arc<TreeNode>> {
        let grammar = self.grammar();
        let production = grammar.production(node.symbol()?)?;
        let capable: Vec<usize> = production
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.handler.as_ref().is_some_and(|h| h.mutation_handler().is_some()))
            .map(|(i, _)| i)
            .collect();
        let position = *random::choice(r, &capable)?;

        let field = &production.fields[position];
        let mutator = field.handler.as_ref()?.mutation_handler()?;
        // A node built with the wrong arity is regenerated instead
        let current = node.init_values().get(position)?;
        let inner_budget = child_budget(grammar, site, node, budget);
        let field_budget = if field.ty.is_tree() { inner_budget } else { inner_budget + 1 };
        match mutator.mutate(r, &self.builder, field_budget, &field.ty, current) {
            Ok(value) => Some(node.with_value(grammar, position, value)),
            Err(e) => {
                debug!("Metahandler mutation of field '{}' failed: {}", field.name, e);
                Some(Arc::clone(node))
            }
        }
    }
}

/// Regenerates the value at `site`, retrying while generation fails or keeps
/// producing a copy of `original`. Falls back to `original` once attempts run out.
pub(crate) fn regenerate(
    r: &mut dyn RandomSource,
    builder: &TreeBuilder<'_>,
    original: &Arc<TreeNode>,
    site: Site<'_>,
    budget: i32,
) -> Arc<TreeNode> {
    let mut replacement = None;
    for attempt in 0..MAX_REGENERATION_ATTEMPTS {
        match builder.create_at_site(r, site, budget) {
            Ok(Value::Node(node)) => {
                let fresh = *node != **original;
                replacement = Some(node);
                if fresh {
                    break;
                }
            }
            Ok(_) => break,
            Err(e) => debug!("Regeneration attempt {} failed: {}", attempt + 1, e),
        }
    }
    replacement.unwrap_or_else(|| Arc::clone(original))
}
