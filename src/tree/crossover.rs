use crate::grammar::metahandlers::CrossoverSite;
use crate::grammar::{Grammar, SymbolId, ValueType};
use crate::random::{self, RandomSource};
use crate::tree::builder::TreeBuilder;
use crate::tree::mutation::regenerate;
use crate::tree::selection::{self, child_budget, count_exact};
use crate::tree::{NodeKind, Site, Tree, TreeNode};
use log::trace;
use std::sync::Arc;

/// Donor subtrees of `donor` (itself included) that may stand where `declared` is
/// expected without the result exceeding `max_depth`.
pub fn find_in_tree(grammar: &Grammar, declared: &ValueType, donor: &Arc<TreeNode>, max_depth: i32) -> Vec<Arc<TreeNode>> {
    find_at_site(grammar, &Site::root(declared), donor, max_depth)
}

/// Donor subtrees of exactly `kind` whose depth fits `max_depth`.
pub fn find_in_tree_exact(kind: &NodeKind, donor: &Arc<TreeNode>, max_depth: i32) -> Vec<Arc<TreeNode>> {
    if max_depth < 0 {
        return Vec::new();
    }
    let max_depth = max_depth as usize;
    std::iter::once(donor)
        .filter(|n| n.kind() == kind)
        .chain(donor.subtrees_of(kind))
        .filter(|n| n.depth() <= max_depth)
        .cloned()
        .collect()
}

pub(crate) fn find_at_site(grammar: &Grammar, site: &Site<'_>, donor: &Arc<TreeNode>, budget: i32) -> Vec<Arc<TreeNode>> {
    if budget < 0 {
        return Vec::new();
    }
    let fits = |node: &Arc<TreeNode>| {
        let cost = match node.kind() {
            NodeKind::Production(concrete) => grammar.expansion_cost(site.ty, *concrete),
            NodeKind::List(_) => 0,
        };
        node.depth().saturating_add(cost) <= budget as usize && site.admits(grammar, node)
    };
    std::iter::once(donor)
        .chain(donor.types_this_way().values().flatten())
        .filter(|&n| fits(n))
        .cloned()
        .collect()
}

/// Subtree crossover over trees rooted at a fixed target type.
#[derive(Debug, Clone)]
pub struct TreeCrossover<'a> {
    builder: TreeBuilder<'a>,
    target: ValueType,
    depth_aware: bool,
}

impl<'a> TreeCrossover<'a> {
    /// Creates a new `TreeCrossover`
    ///
    /// # Arguments
    /// * `builder` - Builder used when no donor fits a cut point
    /// * `target` - Declared type of the parents' roots
    ///
    /// # Returns
    /// `TreeCrossover`, depth-aware when the builder's config asks for it
    pub fn new(builder: TreeBuilder<'a>, target: SymbolId) -> Self {
        Self {
            depth_aware: builder.config().depth_aware_crossover,
            builder,
            target: ValueType::Symbol(target),
        }
    }

    fn grammar(&self) -> &'a Grammar {
        self.builder.grammar()
    }

    fn max_depth(&self) -> i32 {
        self.builder.config().max_depth
    }

    /// Produces two offspring: the first based on `p1` with material from `p2`,
    /// the second the other way round. Neither parent is modified.
    pub fn crossover(&self, r: &mut dyn RandomSource, p1: &Tree, p2: &Tree) -> (Tree, Tree) {
        let first = self.tree_crossover_single_tree(r, p1, p2);
        let second = self.tree_crossover_single_tree(r, p2, p1);
        (first, second)
    }

    /// The offspring of `base` alone, with one subtree taken from `donor`.
    pub fn tree_crossover_single_tree(&self, r: &mut dyn RandomSource, base: &Tree, donor: &Tree) -> Tree {
        self.crossover_inner(r, base, donor, Site::root(&self.target), self.max_depth(), false)
    }

    /// Like `crossover`, but biased toward cutting at occurrences of the production
    /// `specific`. Half of the time, or when either parent lacks an occurrence, each
    /// offspring comes from plain crossover instead.
    pub fn crossover_specific_type(
        &self,
        r: &mut dyn RandomSource,
        p1: &Tree,
        p2: &Tree,
        specific: SymbolId,
    ) -> (Tree, Tree) {
        let first = self.specific_single_tree(r, p1, p2, specific);
        let second = self.specific_single_tree(r, p2, p1, specific);
        (first, second)
    }

    fn specific_single_tree(&self, r: &mut dyn RandomSource, base: &Tree, donor: &Tree, specific: SymbolId) -> Tree {
        let kind = NodeKind::Production(specific);
        let max_depth = self.max_depth().max(0) as usize;
        let fallback = r.randint(0, 1) == 0;
        let in_base = count_exact(base, &kind, max_depth);
        let in_donor = count_exact(donor, &kind, max_depth);
        if fallback || in_base == 0 || in_donor == 0 {
            return self.tree_crossover_single_tree(r, base, donor);
        }

        let n = r.randint(1, in_base as i64) as usize;
        trace!("Forcing crossover at occurrence {} of {}", n, self.grammar().name(specific));
        selection::edit_at_occurrence(
            self.grammar(),
            base,
            Site::root(&self.target),
            self.max_depth(),
            &kind,
            max_depth,
            n,
            &mut |node, site, budget| self.swap(r, node, donor, site, budget),
        )
    }

    /// Crossover starting at `node`, which sits at `site` with `budget` depth left.
    /// With `force` set the cut is made at `node` itself.
    pub(crate) fn crossover_inner(
        &self,
        r: &mut dyn RandomSource,
        node: &Arc<TreeNode>,
        donor: &Arc<TreeNode>,
        site: Site<'_>,
        budget: i32,
        force: bool,
    ) -> Arc<TreeNode> {
        if force {
            return self.swap(r, node, donor, site, budget);
        }
        selection::edit_random_point(r, self.grammar(), node, site, budget, self.depth_aware, &mut |r, n, s, b| {
            self.swap(r, n, donor, s, b)
        })
    }

    /// The cut point itself: delegate to a field's crossover handler when the donor
    /// has instances of the same production, else splice in a compatible donor
    /// subtree, else regenerate.
    fn swap(
        &self,
        r: &mut dyn RandomSource,
        node: &Arc<TreeNode>,
        donor: &Arc<TreeNode>,
        site: Site<'_>,
        budget: i32,
    ) -> Arc<TreeNode> {
        if let Some(recombined) = self.delegate(r, node, donor, &site, budget) {
            return recombined;
        }
        let options = find_at_site(self.grammar(), &site, donor, budget);
        if let Some(choice) = random::choice(r, &options) {
            return Arc::clone(choice);
        }
        regenerate(r, &self.builder, node, site, budget)
    }

    fn delegate(
        &self,
        r: &mut dyn RandomSource,
        node: &Arc<TreeNode>,
        donor: &Arc<TreeNode>,
        site: &Site<'_>,
        budget: i32,
    ) -> Option<Arc<TreeNode>> {
        let grammar = self.grammar();
        let symbol = node.symbol()?;
        let production = grammar.production(symbol)?;
        let has_handler = production
            .fields
            .iter()
            .any(|f| f.handler.as_ref().is_some_and(|h| h.crossover_handler().is_some()));
        if !has_handler {
            return None;
        }

        let position = random::index(r, production.fields.len());
        let donors = find_in_tree_exact(node.kind(), donor, budget);
        if donors.is_empty() {
            return None;
        }
        let field = &production.fields[position];
        let handler = field.handler.as_ref()?.crossover_handler()?;
        let current = node.init_values().get(position)?;
        let inner_budget = child_budget(grammar, site, node, budget);
        let crossover_site = CrossoverSite {
            container: symbol,
            field_index: position,
            field_name: &field.name,
            depth: if field.ty.is_tree() { inner_budget } else { inner_budget + 1 },
        };
        let value = handler.crossover(r, grammar, &donors, crossover_site, current);
        Some(node.with_value(grammar, position, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::grammar::metahandlers::{ListSizeBetween, MetaHandler};
    use crate::grammar::tests::{leaf_middle_grammar, mixed_grammar};
    use crate::grammar::{FieldSpec, GrammarBuilder};
    use crate::random::StdRandomSource;
    use crate::random::tests::ScriptedSource;
    use crate::tree::tests::{assert_labels_fresh, chain, list_items, two_concretes};
    use crate::tree::Value;

    /// Root := Leaf | Pair(l: Root, r: Root)
    fn pair_grammar() -> Grammar {
        let mut b = GrammarBuilder::new();
        let root = b.symbol("Root");
        let leaf = b.production("Leaf", vec![]);
        let pair = b.production(
            "Pair",
            vec![
                FieldSpec::new("l", ValueType::Symbol(root)),
                FieldSpec::new("r", ValueType::Symbol(root)),
            ],
        );
        b.abstract_symbol("Root", &[leaf, pair]);
        b.build(root).unwrap()
    }

    fn config(max_depth: i32) -> TreeConfig {
        TreeConfig {
            max_depth,
            ..TreeConfig::default()
        }
    }

    fn all_subtrees(tree: &Arc<TreeNode>) -> Vec<Arc<TreeNode>> {
        std::iter::once(tree)
            .chain(tree.types_this_way().values().flatten())
            .cloned()
            .collect()
    }

    /// True when `child` is `base` with at most one subtree replaced by one of `donor_parts`.
    fn is_graft(base: &TreeNode, child: &Arc<TreeNode>, donor_parts: &[Arc<TreeNode>]) -> bool {
        if *base == **child || donor_parts.iter().any(|d| d == child) {
            return true;
        }
        if base.kind() != child.kind() {
            return false;
        }
        let differing: Vec<(&Value, &Value)> = base
            .init_values()
            .iter()
            .zip(child.init_values())
            .filter(|(a, b)| a != b)
            .collect();
        match differing.as_slice() {
            [(Value::Node(a), Value::Node(b))] => is_graft(a, b, donor_parts),
            _ => false,
        }
    }

    #[test]
    fn test_find_in_tree_filters_by_depth() {
        let g = leaf_middle_grammar();
        let root = ValueType::Symbol(g.starting_symbol());
        let donor = chain(&g, 3);

        assert_eq!(find_in_tree(&g, &root, &donor, 1).len(), 2);
        assert_eq!(find_in_tree(&g, &root, &donor, 3).len(), 4);
        assert!(find_in_tree(&g, &root, &donor, -1).is_empty());

        let middle = NodeKind::Production(g.symbol("Middle").unwrap());
        assert_eq!(find_in_tree_exact(&middle, &donor, 10).len(), 3);
        assert_eq!(find_in_tree_exact(&middle, &donor, 2).len(), 2);
    }

    #[test]
    fn test_find_in_tree_honors_declared_type() {
        let g = leaf_middle_grammar();
        let leaf = ValueType::Symbol(g.symbol("Leaf").unwrap());
        let found = find_in_tree(&g, &leaf, &chain(&g, 2), 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].depth(), 0);
    }

    #[test]
    fn test_crossover_respects_max_depth() {
        let g = mixed_grammar();
        for depth_aware in [false, true] {
            let config = TreeConfig {
                depth_aware_crossover: depth_aware,
                ..config(4)
            };
            let builder = TreeBuilder::new(&g, &config);
            let crossover = TreeCrossover::new(builder, g.starting_symbol());
            let mut r = StdRandomSource::new(31);
            for _ in 0..60 {
                let p1 = builder.random_individual(&mut r, g.starting_symbol(), 4).unwrap();
                let p2 = builder.random_individual(&mut r, g.starting_symbol(), 4).unwrap();
                let (c1, c2) = crossover.crossover(&mut r, &p1, &p2);
                for child in [&c1, &c2] {
                    assert!(child.depth() <= 4);
                    assert_labels_fresh(&g, child);
                }
            }
        }
    }

    #[test]
    fn test_offspring_preserve_base_outside_cut() {
        let g = pair_grammar();
        let config = config(5);
        let builder = TreeBuilder::new(&g, &config);
        let crossover = TreeCrossover::new(builder, g.starting_symbol());
        let mut r = StdRandomSource::new(8);

        for _ in 0..50 {
            let p1 = builder.random_individual(&mut r, g.starting_symbol(), 5).unwrap();
            let p2 = builder.random_individual(&mut r, g.starting_symbol(), 5).unwrap();
            let snapshot = (*p1).clone();
            let (c1, c2) = crossover.crossover(&mut r, &p1, &p2);
            // Leaf always fits, so every cut is filled from the other parent
            assert!(is_graft(&p1, &c1, &all_subtrees(&p2)));
            assert!(is_graft(&p2, &c2, &all_subtrees(&p1)));
            assert_eq!(*p1, snapshot);
        }
    }

    #[test]
    fn test_list_handler_recombination_keeps_bounds() {
        let g = mixed_grammar();
        let config = config(5);
        let builder = TreeBuilder::new(&g, &config);
        let crossover = TreeCrossover::new(builder, g.starting_symbol());
        let middle_list = g.symbol("MiddleList").unwrap();
        let kind = NodeKind::Production(middle_list);
        let bounds = ListSizeBetween::new(2, 3);
        let mut r = StdRandomSource::new(12);

        for _ in 0..40 {
            let p1 = builder.random_node(&mut r, middle_list, 4).unwrap();
            let p2 = builder.random_node(&mut r, middle_list, 4).unwrap();
            let child = crossover.tree_crossover_single_tree(&mut r, &p1, &p2);
            assert!(child.depth() <= 5);
            let mut lists: Vec<Arc<TreeNode>> = child.subtrees_of(&kind).to_vec();
            if child.kind() == &kind {
                lists.push(Arc::clone(&child));
            }
            for node in lists {
                assert!(bounds.accepts(&node.init_values()[0]));
            }
        }
    }

    #[test]
    fn test_specific_type_crossover() {
        let g = mixed_grammar();
        let config = config(5);
        let builder = TreeBuilder::new(&g, &config);
        let crossover = TreeCrossover::new(builder, g.starting_symbol());
        let middle = g.symbol("Middle").unwrap();
        let mut r = StdRandomSource::new(14);

        for _ in 0..40 {
            let p1 = builder.random_individual(&mut r, g.starting_symbol(), 5).unwrap();
            let p2 = builder.random_individual(&mut r, g.starting_symbol(), 5).unwrap();
            let (c1, c2) = crossover.crossover_specific_type(&mut r, &p1, &p2, middle);
            assert!(c1.depth() <= 5 && c2.depth() <= 5);
            assert_labels_fresh(&g, &c1);
        }
    }

    #[test]
    fn test_specific_type_cuts_at_the_drawn_occurrence() {
        let g = mixed_grammar();
        let config = config(5);
        let crossover = TreeCrossover::new(TreeBuilder::new(&g, &config), g.starting_symbol());
        let concrete = g.symbol("Concrete").unwrap();
        let base = two_concretes(&g);
        let donor = TreeNode::production(&g, concrete, vec![Value::Int(7)]);
        let before = list_items(&base);

        // 1 keeps the targeted branch, 2 picks the second occurrence
        let child = crossover.specific_single_tree(&mut ScriptedSource::new(&[1, 2], 3), &base, &donor, concrete);
        let after = list_items(&child);

        assert_eq!(child.kind(), base.kind());
        assert!(Arc::ptr_eq(&after[0], &before[0]));
        assert!(Arc::ptr_eq(&after[1], &donor));
        assert_labels_fresh(&g, &child);
    }

    #[test]
    fn test_specific_type_falls_back_to_plain_crossover() {
        let g = mixed_grammar();
        let config = config(5);
        let crossover = TreeCrossover::new(TreeBuilder::new(&g, &config), g.starting_symbol());
        let concrete = g.symbol("Concrete").unwrap();
        let base = two_concretes(&g);
        let with_concrete = TreeNode::production(&g, concrete, vec![Value::Int(7)]);
        let without_concrete = chain(&g, 2);

        // a fallback draw of 0 means plain crossover
        let targeted = crossover.specific_single_tree(&mut ScriptedSource::new(&[0], 8), &base, &with_concrete, concrete);
        let plain = crossover.tree_crossover_single_tree(&mut StdRandomSource::new(8), &base, &with_concrete);
        assert_eq!(targeted, plain);

        // the donor has no occurrence: plain crossover despite the targeted draw
        let targeted =
            crossover.specific_single_tree(&mut ScriptedSource::new(&[1], 9), &base, &without_concrete, concrete);
        let plain = crossover.tree_crossover_single_tree(&mut StdRandomSource::new(9), &base, &without_concrete);
        assert_eq!(targeted, plain);
    }

    #[test]
    fn test_no_compatible_donor_regenerates() {
        let g = mixed_grammar();
        let concrete = g.symbol("Concrete").unwrap();
        let base = TreeNode::production(&g, concrete, vec![Value::Int(3)]);
        let donor = chain(&g, 1);
        let bounds = crate::grammar::metahandlers::IntRange::new(0, 9);

        let roomy = config(3);
        let crossover = TreeCrossover::new(TreeBuilder::new(&g, &roomy), concrete);
        let children: Vec<Tree> = (0..10)
            .map(|seed| crossover.tree_crossover_single_tree(&mut StdRandomSource::new(seed), &base, &donor))
            .collect();
        for child in &children {
            assert_eq!(child.symbol(), Some(concrete));
            assert!(bounds.accepts(&child.init_values()[0]));
        }
        assert!(children.iter().any(|c| **c != *base));

        // nothing can be generated either: the base comes back untouched
        let infeasible = config(-1);
        let crossover = TreeCrossover::new(TreeBuilder::new(&g, &infeasible), concrete);
        let child = crossover.tree_crossover_single_tree(&mut StdRandomSource::new(1), &base, &donor);
        assert!(Arc::ptr_eq(&child, &base));
    }

    #[test]
    fn test_wrong_arity_node_takes_a_donor() {
        let mut b = GrammarBuilder::new();
        let bag = b.production(
            "Bag",
            vec![
                FieldSpec::new("xs", ValueType::list_of(ValueType::Int))
                    .with_handler(ListSizeBetween::new(1, 3)),
            ],
        );
        let g = b.build(bag).unwrap();
        let config = config(3);
        let builder = TreeBuilder::new(&g, &config);
        let crossover = TreeCrossover::new(builder, bag);
        let mut r = StdRandomSource::new(10);
        let malformed = TreeNode::production(&g, bag, vec![]);
        let donor = builder.random_individual(&mut r, bag, 3).unwrap();

        let child = crossover.tree_crossover_single_tree(&mut r, &malformed, &donor);
        assert_eq!(*child, *donor);
    }

    #[test]
    fn test_expansion_depthing_is_respected() {
        let mut g = pair_grammar();
        g.set_expansion_depthing(true);
        let config = config(6);
        let builder = TreeBuilder::new(&g, &config);
        let crossover = TreeCrossover::new(builder, g.starting_symbol());
        let mut r = StdRandomSource::new(21);

        for _ in 0..40 {
            let p1 = builder.random_individual(&mut r, g.starting_symbol(), 6).unwrap();
            let p2 = builder.random_individual(&mut r, g.starting_symbol(), 6).unwrap();
            assert!(p1.depth() <= 6 && p2.depth() <= 6);
            let (c1, c2) = crossover.crossover(&mut r, &p1, &p2);
            assert!(c1.depth() <= 6 && c2.depth() <= 6);
        }
    }

    #[test]
    fn test_same_seed_same_offspring() {
        let g = mixed_grammar();
        let config = config(5);
        let builder = TreeBuilder::new(&g, &config);
        let crossover = TreeCrossover::new(builder, g.starting_symbol());
        let mut r = StdRandomSource::new(2);
        let p1 = builder.random_individual(&mut r, g.starting_symbol(), 5).unwrap();
        let p2 = builder.random_individual(&mut r, g.starting_symbol(), 5).unwrap();

        let a = crossover.crossover(&mut StdRandomSource::new(77), &p1, &p2);
        let b = crossover.crossover(&mut StdRandomSource::new(77), &p1, &p2);
        assert_eq!(a, b);
    }
}
