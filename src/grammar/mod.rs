pub mod metahandlers;

use crate::grammar::metahandlers::MetaHandler;
use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Distance reported for symbols that can never reach a terminal.
pub const UNREACHABLE_DISTANCE: usize = usize::MAX;

#[derive(Error, Debug, PartialEq)]
pub enum GrammarError {
    #[error("Start symbol '{0}' is declared but never defined")]
    MissingStartSymbol(String),
    #[error("Undefined symbol referenced in grammar: '{0}'")]
    UndefinedSymbol(String),
    #[error("Symbol '{0}' is defined more than once")]
    DuplicateSymbol(String),
    #[error("Abstract symbol '{0}' has no alternatives")]
    EmptyAlternatives(String),
    #[error("Start symbol '{0}' can never reach a terminal")]
    NonTerminatingGrammar(String),
    #[error("Production '{symbol}' has invalid weight {weight}")]
    InvalidWeight { symbol: String, weight: f64 },
}

/// Handle to a symbol of one specific `Grammar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SymbolId(usize);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Declared type of a field or list element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Str,
    Symbol(SymbolId),
    List(Box<ValueType>),
}

impl ValueType {
    pub fn list_of(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }

    /// Tree-valued types carry structural metadata; primitives do not.
    pub fn is_tree(&self) -> bool {
        matches!(self, ValueType::Symbol(_) | ValueType::List(_))
    }

    fn collect_symbols(&self, out: &mut Vec<SymbolId>) {
        match self {
            ValueType::Symbol(s) => out.push(*s),
            ValueType::List(inner) => inner.collect_symbols(out),
            _ => {}
        }
    }
}

/// One entry of a production's ordered field layout.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: ValueType,
    /// Custom generation strategy; `None` means plain grammar expansion.
    pub handler: Option<Arc<dyn MetaHandler>>,
}

impl FieldSpec {
    pub fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            handler: None,
        }
    }

    pub fn with_handler<H: MetaHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

/// A concrete node type of the grammar.
#[derive(Debug, Clone)]
pub struct Production {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone)]
enum SymbolDef {
    Undefined,
    Abstract(Vec<SymbolId>),
    Concrete(Production),
}

/// Incrementally declares symbols; names may be referenced before they are defined.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    names: Vec<String>,
    index: HashMap<String, SymbolId>,
    defs: Vec<SymbolDef>,
    error: Option<GrammarError>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `name`, declaring it if it was never mentioned.
    pub fn symbol(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = SymbolId(self.names.len());
        self.names.push(name.to_string());
        self.defs.push(SymbolDef::Undefined);
        self.index.insert(name.to_string(), id);
        id
    }

    /// Defines an abstract symbol. Alternatives may themselves be abstract.
    pub fn abstract_symbol(&mut self, name: &str, alternatives: &[SymbolId]) -> SymbolId {
        self.define(name, SymbolDef::Abstract(alternatives.to_vec()))
    }

    pub fn production(&mut self, name: &str, fields: Vec<FieldSpec>) -> SymbolId {
        self.define(
            name,
            SymbolDef::Concrete(Production {
                name: name.to_string(),
                fields,
                weight: None,
            }),
        )
    }

    /// A production that is picked proportionally to `weight` among its siblings.
    pub fn weighted_production(&mut self, name: &str, fields: Vec<FieldSpec>, weight: f64) -> SymbolId {
        self.define(
            name,
            SymbolDef::Concrete(Production {
                name: name.to_string(),
                fields,
                weight: Some(weight),
            }),
        )
    }

    fn define(&mut self, name: &str, def: SymbolDef) -> SymbolId {
        let id = self.symbol(name);
        if !matches!(self.defs[id.0], SymbolDef::Undefined) && self.error.is_none() {
            self.error = Some(GrammarError::DuplicateSymbol(name.to_string()));
        }
        self.defs[id.0] = def;
        id
    }

    /// Validates the declarations and precomputes every table the tree operators consult.
    pub fn build(self, start: SymbolId) -> Result<Grammar, GrammarError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let GrammarBuilder { names, index, defs, .. } = self;

        if matches!(defs.get(start.0), None | Some(SymbolDef::Undefined)) {
            let name = names.get(start.0).cloned().unwrap_or_default();
            return Err(GrammarError::MissingStartSymbol(name));
        }

        // 1. Undefined symbols, empty alternative sets and bad weights
        for (id, def) in defs.iter().enumerate() {
            match def {
                SymbolDef::Undefined => {
                    return Err(GrammarError::UndefinedSymbol(names[id].clone()));
                }
                SymbolDef::Abstract(alternatives) if alternatives.is_empty() => {
                    return Err(GrammarError::EmptyAlternatives(names[id].clone()));
                }
                SymbolDef::Concrete(production) => {
                    if let Some(weight) = production.weight {
                        if !weight.is_finite() || weight < 0.0 {
                            return Err(GrammarError::InvalidWeight {
                                symbol: names[id].clone(),
                                weight,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let mut grammar = Grammar {
            names,
            index,
            defs,
            starting_symbol: start,
            alternatives: Vec::new(),
            abstract_dist_to_t: Vec::new(),
            distances: Vec::new(),
            expanded_distances: Vec::new(),
            recursive: Vec::new(),
            expansion_depthing: false,
        };
        grammar.flatten_alternatives();

        // 2. Unreachable symbols are tolerated, just reported
        let reachable = grammar.reachable_from(&[start]);
        for (id, name) in grammar.names.iter().enumerate() {
            if !reachable.contains(&SymbolId(id)) {
                warn!("Symbol '{}' is unreachable from '{}'", name, grammar.names[start.0]);
            }
        }

        // 3. Distances to terminal, with and without expansion depthing
        grammar.distances = grammar.compute_distances(false);
        grammar.expanded_distances = grammar.compute_distances(true);
        if grammar.distances[start.0] == UNREACHABLE_DISTANCE {
            return Err(GrammarError::NonTerminatingGrammar(grammar.names[start.0].clone()));
        }
        for (id, distance) in grammar.distances.iter().enumerate() {
            if *distance == UNREACHABLE_DISTANCE {
                warn!("Symbol '{}' can never reach a terminal", grammar.names[id]);
            }
        }

        // 4. Productions that can expand back into themselves
        let recursive: Vec<bool> = (0..grammar.defs.len())
            .map(|id| match &grammar.defs[id] {
                SymbolDef::Concrete(_) => {
                    let successors = grammar.successors(SymbolId(id));
                    grammar.reachable_from(&successors).contains(&SymbolId(id))
                }
                _ => false,
            })
            .collect();
        grammar.recursive = recursive;

        Ok(grammar)
    }
}

/// A validated typed grammar, together with the depth tables the tree builder needs.
#[derive(Debug, Clone)]
pub struct Grammar {
    names: Vec<String>,
    index: HashMap<String, SymbolId>,
    defs: Vec<SymbolDef>,
    starting_symbol: SymbolId,
    /// Concrete productions reachable through each abstract symbol, in declaration order
    alternatives: Vec<Vec<SymbolId>>,
    /// Length of the shortest abstract chain from an abstract symbol to each concrete one
    abstract_dist_to_t: Vec<BTreeMap<SymbolId, usize>>,
    distances: Vec<usize>,
    expanded_distances: Vec<usize>,
    recursive: Vec<bool>,
    expansion_depthing: bool,
}

impl Grammar {
    pub fn starting_symbol(&self) -> SymbolId {
        self.starting_symbol
    }

    pub fn contains(&self, symbol: SymbolId) -> bool {
        symbol.0 < self.defs.len()
    }

    pub fn symbol(&self, name: &str) -> Option<SymbolId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, symbol: SymbolId) -> &str {
        self.names.get(symbol.0).map(String::as_str).unwrap_or("<unknown>")
    }

    pub fn symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        (0..self.defs.len()).map(SymbolId)
    }

    pub fn is_abstract(&self, symbol: SymbolId) -> bool {
        matches!(self.defs.get(symbol.0), Some(SymbolDef::Abstract(_)))
    }

    /// Concrete productions an abstract symbol may expand into. Empty for concrete symbols.
    pub fn alternatives_of(&self, symbol: SymbolId) -> &[SymbolId] {
        self.alternatives.get(symbol.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn production(&self, symbol: SymbolId) -> Option<&Production> {
        match self.defs.get(symbol.0) {
            Some(SymbolDef::Concrete(production)) => Some(production),
            _ => None,
        }
    }

    pub fn weight_of(&self, symbol: SymbolId) -> Option<f64> {
        self.production(symbol).and_then(|p| p.weight)
    }

    pub fn is_recursive(&self, symbol: SymbolId) -> bool {
        self.recursive.get(symbol.0).copied().unwrap_or(false)
    }

    pub fn expansion_depthing(&self) -> bool {
        self.expansion_depthing
    }

    pub fn set_expansion_depthing(&mut self, enabled: bool) {
        self.expansion_depthing = enabled;
    }

    fn active_distances(&self) -> &[usize] {
        if self.expansion_depthing {
            &self.expanded_distances
        } else {
            &self.distances
        }
    }

    /// Minimum depth budget needed to finish a tree rooted at `symbol`.
    pub fn distance_to_terminal(&self, symbol: SymbolId) -> usize {
        self.active_distances()
            .get(symbol.0)
            .copied()
            .unwrap_or(UNREACHABLE_DISTANCE)
    }

    /// Minimum depth budget for a value of type `ty` (primitives and bare lists need none).
    pub fn value_distance(&self, ty: &ValueType) -> usize {
        value_distance(self.active_distances(), ty)
    }

    /// Like `value_distance`, but honoring the field's metahandler.
    pub fn field_distance(&self, ty: &ValueType, handler: Option<&Arc<dyn MetaHandler>>) -> usize {
        field_distance(self.active_distances(), ty, handler)
    }

    /// Smallest tree depth the starting symbol can produce.
    pub fn min_tree_depth(&self) -> usize {
        self.distance_to_terminal(self.starting_symbol)
    }

    /// Raw abstraction-chain length between `abstract_symbol` and `concrete`, 0 if unrelated.
    pub fn abstract_dist_to_t(&self, abstract_symbol: SymbolId, concrete: SymbolId) -> usize {
        self.abstract_dist_to_t
            .get(abstract_symbol.0)
            .and_then(|m| m.get(&concrete))
            .copied()
            .unwrap_or(0)
    }

    /// Extra depth consumed when a position declared as `declared` holds a `concrete` node.
    /// Always 0 unless expansion depthing is enabled.
    pub fn expansion_cost(&self, declared: &ValueType, concrete: SymbolId) -> usize {
        match declared {
            ValueType::Symbol(a) if self.expansion_depthing && self.is_abstract(*a) => {
                self.abstract_dist_to_t(*a, concrete)
            }
            _ => 0,
        }
    }

    /// Whether a node of production `concrete` may stand where `declared` is expected.
    pub fn is_subtype(&self, concrete: SymbolId, declared: SymbolId) -> bool {
        concrete == declared || self.alternatives_of(declared).contains(&concrete)
    }

    /// Human-readable form of a value type.
    pub fn describe(&self, ty: &ValueType) -> String {
        match ty {
            ValueType::Int => "int".to_string(),
            ValueType::Float => "float".to_string(),
            ValueType::Bool => "bool".to_string(),
            ValueType::Str => "str".to_string(),
            ValueType::Symbol(s) => self.name(*s).to_string(),
            ValueType::List(inner) => format!("list[{}]", self.describe(inner)),
        }
    }

    fn successors(&self, symbol: SymbolId) -> Vec<SymbolId> {
        let mut out = Vec::new();
        match &self.defs[symbol.0] {
            SymbolDef::Abstract(alternatives) => out.extend_from_slice(alternatives),
            SymbolDef::Concrete(production) => {
                for field in &production.fields {
                    field.ty.collect_symbols(&mut out);
                }
            }
            SymbolDef::Undefined => {}
        }
        out
    }

    fn reachable_from(&self, roots: &[SymbolId]) -> HashSet<SymbolId> {
        let mut reachable = HashSet::new();
        let mut queue: VecDeque<SymbolId> = VecDeque::new();
        for root in roots {
            if reachable.insert(*root) {
                queue.push_back(*root);
            }
        }
        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        reachable
    }

    fn flatten_alternatives(&mut self) {
        let n = self.defs.len();
        let mut alternatives = vec![Vec::new(); n];
        let mut chains = vec![BTreeMap::new(); n];

        for id in 0..n {
            let SymbolDef::Abstract(direct) = &self.defs[id] else {
                continue;
            };
            let mut seen = HashSet::new();
            let mut queue: VecDeque<(SymbolId, usize)> = direct.iter().map(|s| (*s, 1)).collect();
            while let Some((symbol, chain)) = queue.pop_front() {
                if !seen.insert(symbol) {
                    continue;
                }
                match &self.defs[symbol.0] {
                    SymbolDef::Concrete(_) => {
                        alternatives[id].push(symbol);
                        chains[id].insert(symbol, chain);
                    }
                    SymbolDef::Abstract(nested) => {
                        queue.extend(nested.iter().map(|s| (*s, chain + 1)));
                    }
                    SymbolDef::Undefined => {}
                }
            }
        }

        self.alternatives = alternatives;
        self.abstract_dist_to_t = chains;
    }

    fn compute_distances(&self, expansion_depthing: bool) -> Vec<usize> {
        let mut dist = vec![UNREACHABLE_DISTANCE; self.defs.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for id in 0..self.defs.len() {
                let candidate = match &self.defs[id] {
                    SymbolDef::Concrete(production) => production
                        .fields
                        .iter()
                        .filter(|f| f.ty.is_tree())
                        .map(|f| field_distance(&dist, &f.ty, f.handler.as_ref()).saturating_add(1))
                        .max()
                        .unwrap_or(0),
                    SymbolDef::Abstract(_) => self.alternatives[id]
                        .iter()
                        .map(|c| {
                            let extra = if expansion_depthing {
                                self.abstract_dist_to_t[id].get(c).copied().unwrap_or(0)
                            } else {
                                0
                            };
                            dist[c.0].saturating_add(extra)
                        })
                        .min()
                        .unwrap_or(UNREACHABLE_DISTANCE),
                    SymbolDef::Undefined => UNREACHABLE_DISTANCE,
                };
                if candidate < dist[id] {
                    dist[id] = candidate;
                    changed = true;
                }
            }
        }
        dist
    }
}

fn value_distance(dist: &[usize], ty: &ValueType) -> usize {
    match ty {
        ValueType::Symbol(s) => dist.get(s.0).copied().unwrap_or(UNREACHABLE_DISTANCE),
        _ => 0,
    }
}

fn field_distance(dist: &[usize], ty: &ValueType, handler: Option<&Arc<dyn MetaHandler>>) -> usize {
    let base = value_distance(dist, ty);
    match handler {
        Some(h) => {
            // Primitive elements are not nodes, so they add no list level
            let element = match ty {
                ValueType::List(inner) if inner.is_tree() => Some(value_distance(dist, inner)),
                _ => None,
            };
            h.distance_to_terminal(base, element)
        }
        None => base,
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
