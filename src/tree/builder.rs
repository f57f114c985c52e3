use crate::config::TreeConfig;
use crate::grammar::{Grammar, SymbolId, ValueType};
use crate::random::{self, RandomSource};
use crate::tree::{GenerationError, Site, Tree, TreeNode, Value};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How eagerly the builder recurses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenerationMethod {
    /// Any production whose depth fits the budget may be picked
    #[default]
    Grow,
    /// Recursive productions are preferred until the budget is spent, so every
    /// branch reaches the full depth whenever the grammar allows it
    Full,
    /// One randomly chosen branch is carried to the full depth, every other branch grows
    PositionIndependentGrow,
}

/// Recursive-descent generator of grammar-valid trees under a depth budget.
///
/// The builder is a cheap view over a grammar and a config; it holds no random
/// state of its own, every call receives the random source explicitly.
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder<'a> {
    grammar: &'a Grammar,
    config: &'a TreeConfig,
    method: GenerationMethod,
    /// Depth the tree should reach before terminal productions are allowed (grow only)
    min_depth: i32,
}

impl<'a> TreeBuilder<'a> {
    /// Creates a new `TreeBuilder` using the grow method
    ///
    /// # Arguments
    /// * `grammar` - The grammar trees are generated from
    /// * `config` - Source of the default ranges for unannotated primitive fields
    ///
    /// # Returns
    /// `TreeBuilder`
    pub fn new(grammar: &'a Grammar, config: &'a TreeConfig) -> Self {
        Self {
            grammar,
            config,
            method: GenerationMethod::Grow,
            min_depth: 0,
        }
    }

    pub fn with_method(mut self, method: GenerationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_min_depth(mut self, min_depth: i32) -> Self {
        self.min_depth = min_depth;
        self
    }

    pub fn grammar(&self) -> &'a Grammar {
        self.grammar
    }

    pub fn config(&self) -> &'a TreeConfig {
        self.config
    }

    pub fn method(&self) -> GenerationMethod {
        self.method
    }

    /// Generates a value of type `ty` whose depth does not exceed `depth`.
    ///
    /// # Arguments
    /// * `r` - The random source to draw from
    /// * `ty` - Declared type of the value
    /// * `depth` - Depth budget
    ///
    /// # Returns
    /// `Result<Value, GenerationError>` - the generated value, or why none fits the budget
    pub fn create_node(
        &self,
        r: &mut dyn RandomSource,
        ty: &ValueType,
        depth: i32,
    ) -> Result<Value, GenerationError> {
        let must_reach = match self.method {
            GenerationMethod::Full | GenerationMethod::PositionIndependentGrow => depth,
            GenerationMethod::Grow => self.min_depth.min(depth),
        };
        self.expand(r, Site::root(ty), depth, must_reach)
    }

    /// Nested generation on behalf of a metahandler or an operator. Grow never
    /// forces depth here; full keeps filling the budget.
    pub fn create_child(
        &self,
        r: &mut dyn RandomSource,
        ty: &ValueType,
        depth: i32,
    ) -> Result<Value, GenerationError> {
        self.create_at_site(r, Site::root(ty), depth)
    }

    /// Like `create_child`, honoring the metahandler of the field being filled.
    pub(crate) fn create_at_site(
        &self,
        r: &mut dyn RandomSource,
        site: Site<'_>,
        depth: i32,
    ) -> Result<Value, GenerationError> {
        let must_reach = match self.method {
            GenerationMethod::Full => depth,
            GenerationMethod::Grow | GenerationMethod::PositionIndependentGrow => 0,
        };
        self.expand(r, site, depth, must_reach)
    }

    /// Generates a subtree rooted at `symbol`, which may be abstract.
    pub fn random_node(
        &self,
        r: &mut dyn RandomSource,
        symbol: SymbolId,
        depth: i32,
    ) -> Result<Arc<TreeNode>, GenerationError> {
        self.create_node(r, &ValueType::Symbol(symbol), depth)?
            .into_node()
            .ok_or_else(|| GenerationError::UnknownSymbol(symbol.to_string()))
    }

    /// Generates a whole individual rooted at `root`.
    ///
    /// Fails fast with `DepthInfeasible` when `max_depth` is below the smallest
    /// depth `root` can produce at all.
    ///
    /// # Arguments
    /// * `r` - The random source to draw from
    /// * `root` - Declared type of the individual, usually the starting symbol
    /// * `max_depth` - Depth ceiling of the individual
    ///
    /// # Returns
    /// `Result<Tree, GenerationError>`
    pub fn random_individual(
        &self,
        r: &mut dyn RandomSource,
        root: SymbolId,
        max_depth: i32,
    ) -> Result<Tree, GenerationError> {
        self.check_known(&ValueType::Symbol(root))?;
        let required = self.grammar.distance_to_terminal(root);
        if max_depth < 0 || (max_depth as usize) < required {
            return Err(GenerationError::DepthInfeasible {
                symbol: self.grammar.name(root).to_string(),
                provided: max_depth,
                required,
            });
        }
        let tree = self.random_node(r, root, max_depth)?;
        debug!(
            "Generated {} individual: depth {}, {} nodes",
            self.grammar.name(root),
            tree.depth(),
            tree.node_count()
        );
        Ok(tree)
    }

    fn expand(
        &self,
        r: &mut dyn RandomSource,
        site: Site<'_>,
        depth: i32,
        must_reach: i32,
    ) -> Result<Value, GenerationError> {
        self.check_known(site.ty)?;
        let required = self.grammar.field_distance(site.ty, site.handler);
        if depth < 0 || (depth as usize) < required {
            return Err(GenerationError::DepthInfeasible {
                symbol: self.grammar.describe(site.ty),
                provided: depth,
                required,
            });
        }

        if let Some(handler) = site.handler {
            trace!("Delegating field '{}' to {:?}", site.name, handler);
            return handler.generate(r, self, depth, site.ty, site.name);
        }

        match site.ty {
            ValueType::Int => {
                let (lo, hi) = self.config.int_range;
                Ok(Value::Int(r.randint(lo, hi)))
            }
            ValueType::Float => {
                let (lo, hi) = self.config.float_range;
                Ok(Value::Float(r.random_float(lo, hi)))
            }
            ValueType::Bool => Ok(Value::Bool(r.random_bool())),
            ValueType::Str => {
                let len = r.randint(0, self.config.max_string_length as i64) as usize;
                let s = (0..len)
                    .map(|_| char::from(b'a' + r.randint(0, 25) as u8))
                    .collect();
                Ok(Value::Str(s))
            }
            ValueType::List(inner) => self.expand_list(r, inner, depth, must_reach),
            ValueType::Symbol(symbol) => self
                .expand_symbol(r, *symbol, depth, must_reach)
                .map(Value::Node),
        }
    }

    fn check_known(&self, ty: &ValueType) -> Result<(), GenerationError> {
        match ty {
            ValueType::Symbol(symbol) if !self.grammar.contains(*symbol) => {
                Err(GenerationError::UnknownSymbol(symbol.to_string()))
            }
            ValueType::List(inner) => self.check_known(inner),
            _ => Ok(()),
        }
    }

    /// Unannotated lists: a bounded random number of elements, each one level deeper.
    fn expand_list(
        &self,
        r: &mut dyn RandomSource,
        inner: &ValueType,
        depth: i32,
        must_reach: i32,
    ) -> Result<Value, GenerationError> {
        let element_depth = if inner.is_tree() { depth - 1 } else { depth };
        let fits = element_depth >= 0 && element_depth as usize >= self.grammar.value_distance(inner);
        let max_size = match (fits, inner.is_tree()) {
            (false, _) => 0,
            (true, true) => (depth as usize).min(self.config.max_list_size),
            (true, false) => self.config.max_list_size,
        };
        let min_size = if must_reach > 0 { max_size.min(1) } else { 0 };
        let size = r.randint(min_size as i64, max_size as i64) as usize;

        let positions: Vec<usize> = (0..size).collect();
        let carrier = self.carrier(r, &positions, must_reach);
        let items = (0..size)
            .map(|i| self.expand(r, Site::root(inner), element_depth, branch_reach(carrier, i, must_reach)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Node(TreeNode::list(self.grammar, inner.clone(), items)))
    }

    fn expand_symbol(
        &self,
        r: &mut dyn RandomSource,
        symbol: SymbolId,
        depth: i32,
        must_reach: i32,
    ) -> Result<Arc<TreeNode>, GenerationError> {
        if self.grammar.is_abstract(symbol) {
            let chosen = self.choose_alternative(r, symbol, depth, must_reach)?;
            let cost = self.grammar.expansion_cost(&ValueType::Symbol(symbol), chosen) as i32;
            return self.expand_symbol(r, chosen, depth - cost, must_reach - cost);
        }

        let production = self
            .grammar
            .production(symbol)
            .ok_or_else(|| GenerationError::UnknownSymbol(symbol.to_string()))?;
        let branches: Vec<usize> = (0..production.fields.len())
            .filter(|i| production.fields[*i].ty.is_tree())
            .collect();
        let carrier = self.carrier(r, &branches, must_reach);
        let mut values = Vec::with_capacity(production.fields.len());
        for (position, field) in production.fields.iter().enumerate() {
            let site = Site {
                ty: &field.ty,
                handler: field.handler.as_ref(),
                name: &field.name,
            };
            let child_depth = if field.ty.is_tree() { depth - 1 } else { depth };
            values.push(self.expand(r, site, child_depth, branch_reach(carrier, position, must_reach))?);
        }
        Ok(TreeNode::production(self.grammar, symbol, values))
    }

    /// Under position-independent grow, the one branch among `branches` that keeps
    /// the depth requirement. `None` means every branch keeps it.
    fn carrier(&self, r: &mut dyn RandomSource, branches: &[usize], must_reach: i32) -> Option<usize> {
        if self.method != GenerationMethod::PositionIndependentGrow || must_reach <= 0 {
            return None;
        }
        random::choice(r, branches).copied()
    }

    /// Picks the concrete production an abstract symbol expands into.
    fn choose_alternative(
        &self,
        r: &mut dyn RandomSource,
        symbol: SymbolId,
        depth: i32,
        must_reach: i32,
    ) -> Result<SymbolId, GenerationError> {
        let declared = ValueType::Symbol(symbol);
        let costs: Vec<(SymbolId, usize)> = self
            .grammar
            .alternatives_of(symbol)
            .iter()
            .map(|c| {
                let required = self
                    .grammar
                    .distance_to_terminal(*c)
                    .saturating_add(self.grammar.expansion_cost(&declared, *c));
                (*c, required)
            })
            .collect();

        let mut valid: Vec<SymbolId> = costs
            .iter()
            .filter(|(_, required)| depth >= 0 && *required <= depth as usize)
            .map(|(c, _)| *c)
            .collect();
        if must_reach > 0 && valid.iter().any(|c| self.grammar.is_recursive(*c)) {
            valid.retain(|c| self.grammar.is_recursive(*c));
        }

        let chosen = if valid.iter().any(|c| self.grammar.weight_of(*c).is_some()) {
            let weights: Vec<f64> = valid
                .iter()
                .map(|c| self.grammar.weight_of(*c).unwrap_or(1.0))
                .collect();
            random::choice_weighted(r, &valid, &weights)
        } else {
            random::choice(r, &valid)
        };

        chosen.copied().ok_or_else(|| GenerationError::NoValidProduction {
            symbol: self.grammar.name(symbol).to_string(),
            depth,
            candidates: costs
                .iter()
                .map(|(c, required)| (self.grammar.name(*c).to_string(), *required))
                .collect(),
        })
    }
}

fn branch_reach(carrier: Option<usize>, position: usize, must_reach: i32) -> i32 {
    match carrier {
        Some(c) if c != position => 0,
        _ => must_reach - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::metahandlers::{IntRange, ListSizeBetween, MetaHandler};
    use crate::grammar::tests::{leaf_middle_grammar, mixed_grammar};
    use crate::grammar::{FieldSpec, GrammarBuilder};
    use crate::random::StdRandomSource;
    use crate::tree::tests::assert_labels_fresh;
    use crate::tree::NodeKind;

    fn individual(g: &Grammar, seed: u64, max_depth: i32) -> Result<Tree, GenerationError> {
        let config = TreeConfig::default();
        let mut r = StdRandomSource::new(seed);
        TreeBuilder::new(g, &config).random_individual(&mut r, g.starting_symbol(), max_depth)
    }

    #[test]
    fn test_leaf_middle_respects_depth() {
        let g = leaf_middle_grammar();
        let leaf = g.symbol("Leaf").unwrap();
        let middle = g.symbol("Middle").unwrap();
        for seed in 0..50 {
            let tree = individual(&g, seed, 3).unwrap();
            assert!(tree.depth() <= 3);
            assert!(tree.symbol() == Some(leaf) || tree.symbol() == Some(middle));
            assert_labels_fresh(&g, &tree);
        }
    }

    #[test]
    fn test_zero_depth_yields_leaf() {
        let g = leaf_middle_grammar();
        let tree = individual(&g, 1, 0).unwrap();
        assert_eq!(tree.symbol(), g.symbol("Leaf"));
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_negative_depth_is_infeasible() {
        let g = leaf_middle_grammar();
        let err = individual(&g, 1, -1).unwrap_err();
        assert_eq!(
            err,
            GenerationError::DepthInfeasible {
                symbol: "Root".to_string(),
                provided: -1,
                required: 0,
            }
        );
    }

    #[test]
    fn test_depth_below_grammar_minimum_is_infeasible() {
        let mut b = GrammarBuilder::new();
        let leaf = b.production("Leaf", vec![]);
        let start = b.production("Pair", vec![FieldSpec::new("a", ValueType::Symbol(leaf))]);
        let g = b.build(start).unwrap();

        assert!(matches!(
            individual(&g, 3, 0),
            Err(GenerationError::DepthInfeasible { required: 1, .. })
        ));
        assert_eq!(individual(&g, 3, 1).unwrap().depth(), 1);
    }

    #[test]
    fn test_full_method_reaches_budget() {
        let g = leaf_middle_grammar();
        let config = TreeConfig::default();
        let builder = TreeBuilder::new(&g, &config).with_method(GenerationMethod::Full);
        let mut r = StdRandomSource::new(5);
        for depth in 0..6 {
            let tree = builder.random_individual(&mut r, g.starting_symbol(), depth).unwrap();
            assert_eq!(tree.depth(), depth as usize);
        }
    }

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

    #[test]
    fn test_position_independent_grow_reaches_depth_on_one_branch() {
        let g = pair_grammar();
        let config = TreeConfig::default();
        let builder = TreeBuilder::new(&g, &config).with_method(GenerationMethod::PositionIndependentGrow);
        let full = TreeBuilder::new(&g, &config).with_method(GenerationMethod::Full);
        let mut r = StdRandomSource::new(21);

        let complete = full.random_individual(&mut r, g.starting_symbol(), 3).unwrap();
        assert_eq!(complete.node_count(), 15);

        let trees: Vec<Tree> = (0..40)
            .map(|_| builder.random_individual(&mut r, g.starting_symbol(), 3).unwrap())
            .collect();
        assert!(trees.iter().all(|t| t.depth() == 3));
        assert!(trees.iter().any(|t| t.node_count() < 15), "Non-carrier branches should grow");
        for tree in &trees {
            assert_labels_fresh(&g, tree);
        }
    }

    #[test]
    fn test_primitive_list_fits_its_minimum_depth() {
        let mut b = GrammarBuilder::new();
        let start = b.production(
            "Vec",
            vec![
                FieldSpec::new("xs", ValueType::list_of(ValueType::Int))
                    .with_handler(ListSizeBetween::new(1, 3)),
            ],
        );
        let g = b.build(start).unwrap();

        for seed in 0..10 {
            let tree = individual(&g, seed, 1).unwrap();
            assert_eq!(tree.depth(), 1);
            assert_eq!(tree.distance_to_terminal(), 1);
            let items = tree.init_values()[0].as_node().unwrap().init_values().len();
            assert!((1..=3).contains(&items));
        }
        assert!(matches!(
            individual(&g, 0, 0),
            Err(GenerationError::DepthInfeasible { required: 1, .. })
        ));
    }

    #[test]
    fn test_infeasible_error_names_requested_root() {
        let g = leaf_middle_grammar();
        let config = TreeConfig::default();
        let middle = g.symbol("Middle").unwrap();
        let mut r = StdRandomSource::new(1);

        let err = TreeBuilder::new(&g, &config).random_individual(&mut r, middle, 0).unwrap_err();
        assert_eq!(
            err,
            GenerationError::DepthInfeasible {
                symbol: "Middle".to_string(),
                provided: 0,
                required: 1,
            }
        );
    }

    #[test]
    fn test_grow_min_depth_forces_recursion() {
        let g = leaf_middle_grammar();
        let config = TreeConfig::default();
        let builder = TreeBuilder::new(&g, &config).with_min_depth(2);
        let mut r = StdRandomSource::new(11);
        for _ in 0..20 {
            let tree = builder.random_individual(&mut r, g.starting_symbol(), 4).unwrap();
            assert!(tree.depth() >= 2 && tree.depth() <= 4);
        }
    }

    #[test]
    fn test_zero_weight_never_chosen() {
        let mut b = GrammarBuilder::new();
        let root = b.symbol("Root");
        let never = b.weighted_production("Never", vec![], 0.0);
        let always = b.weighted_production("Always", vec![], 1.0);
        b.abstract_symbol("Root", &[never, always]);
        let g = b.build(root).unwrap();

        for seed in 0..30 {
            assert_eq!(individual(&g, seed, 2).unwrap().symbol(), Some(always));
        }
    }

    #[test]
    fn test_no_valid_production_lists_candidates() {
        let g = leaf_middle_grammar();
        let config = TreeConfig::default();
        let builder = TreeBuilder::new(&g, &config);
        let mut r = StdRandomSource::new(1);
        let root = g.symbol("Root").unwrap();

        let err = builder.expand_symbol(&mut r, root, -1, 0).unwrap_err();
        match err {
            GenerationError::NoValidProduction { symbol, depth, candidates } => {
                assert_eq!(symbol, "Root");
                assert_eq!(depth, -1);
                assert_eq!(
                    candidates,
                    vec![("Leaf".to_string(), 0), ("Middle".to_string(), 1)]
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_symbol() {
        let g = leaf_middle_grammar();
        let bigger = mixed_grammar();
        let foreign = bigger.symbol("MiddleList").unwrap();
        let config = TreeConfig::default();
        let mut r = StdRandomSource::new(1);

        let result = TreeBuilder::new(&g, &config).random_node(&mut r, foreign, 3);
        assert!(matches!(result, Err(GenerationError::UnknownSymbol(_))));
    }

    #[test]
    fn test_metahandler_bounds_are_honored() {
        let g = mixed_grammar();
        let middle_list = NodeKind::Production(g.symbol("MiddleList").unwrap());
        let concrete = NodeKind::Production(g.symbol("Concrete").unwrap());
        let int_bounds = IntRange::new(0, 9);
        let list_bounds = ListSizeBetween::new(2, 3);

        for seed in 0..40 {
            let tree = individual(&g, seed, 4).unwrap();
            assert!(tree.depth() <= 4);
            let mut nodes: Vec<Arc<TreeNode>> = tree.subtrees_of(&middle_list).to_vec();
            if tree.kind() == &middle_list {
                nodes.push(Arc::clone(&tree));
            }
            for node in nodes {
                assert!(list_bounds.accepts(&node.init_values()[0]));
            }
            for node in tree.subtrees_of(&concrete) {
                assert!(int_bounds.accepts(&node.init_values()[0]));
            }
        }
    }

    #[test]
    fn test_unannotated_primitives_use_config_ranges() {
        let mut b = GrammarBuilder::new();
        let start = b.production(
            "Point",
            vec![
                FieldSpec::new("x", ValueType::Int),
                FieldSpec::new("y", ValueType::Float),
                FieldSpec::new("label", ValueType::Str),
                FieldSpec::new("tags", ValueType::list_of(ValueType::Bool)),
            ],
        );
        let g = b.build(start).unwrap();
        let config = TreeConfig {
            int_range: (-3, 3),
            float_range: (0.0, 1.0),
            max_string_length: 4,
            max_list_size: 2,
            ..TreeConfig::default()
        };
        let builder = TreeBuilder::new(&g, &config);
        let mut r = StdRandomSource::new(8);

        for _ in 0..30 {
            let tree = builder.random_individual(&mut r, start, 1).unwrap();
            let values = tree.init_values();
            assert!(matches!(values[0], Value::Int(v) if (-3..=3).contains(&v)));
            assert!(matches!(values[1], Value::Float(v) if (0.0..1.0).contains(&v)));
            assert!(matches!(&values[2], Value::Str(s) if s.len() <= 4));
            let tags = values[3].as_node().unwrap();
            assert!(tags.init_values().len() <= 2);
            // The list of primitives is a leaf one level below the root
            assert_eq!(tree.depth(), 1);
        }
    }

    #[test]
    fn test_same_seed_same_tree() {
        let g = mixed_grammar();
        let a = individual(&g, 42, 5).unwrap();
        let b = individual(&g, 42, 5).unwrap();
        assert_eq!(a, b);
    }
}
