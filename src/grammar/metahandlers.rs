//! Pluggable generation strategies for annotated fields.
//!
//! A field whose `FieldSpec` carries a metahandler is never expanded through the
//! grammar: the handler generates it, and, when it exposes the optional
//! mutation or crossover capability, the tree operators delegate to it as well.

use crate::grammar::{Grammar, SymbolId, ValueType};
use crate::random::{self, RandomSource};
use crate::tree::builder::TreeBuilder;
use crate::tree::{GenerationError, TreeNode, Value};
use std::fmt;
use std::sync::Arc;

pub trait MetaHandler: fmt::Debug + Send + Sync {
    /// Produces a fresh value for the annotated field.
    ///
    /// # Arguments
    /// * `r` - Random source of the current operation
    /// * `builder` - The tree builder, for any nested recursive generation
    /// * `depth` - Depth budget available to the field's value
    /// * `base` - Declared type of the field
    /// * `field` - Name of the field being generated
    fn generate(
        &self,
        r: &mut dyn RandomSource,
        builder: &TreeBuilder<'_>,
        depth: i32,
        base: &ValueType,
        field: &str,
    ) -> Result<Value, GenerationError>;

    /// Minimum depth the handler needs, given the grammar's own figure for the field
    /// and, for lists of tree-valued elements, the element type's distance.
    fn distance_to_terminal(&self, grammar_distance: usize, _element_distance: Option<usize>) -> usize {
        grammar_distance
    }

    /// Whether a value produced elsewhere may be stored in the annotated field.
    fn accepts(&self, _value: &Value) -> bool {
        true
    }

    fn mutation_handler(&self) -> Option<&dyn MutationHandler> {
        None
    }

    fn crossover_handler(&self) -> Option<&dyn CrossoverHandler> {
        None
    }
}

pub trait MutationHandler {
    fn mutate(
        &self,
        r: &mut dyn RandomSource,
        builder: &TreeBuilder<'_>,
        depth: i32,
        base: &ValueType,
        current: &Value,
    ) -> Result<Value, GenerationError>;
}

/// Location of a crossover delegated to a metahandler.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverSite<'a> {
    /// Production of the node being recombined
    pub container: SymbolId,
    pub field_index: usize,
    pub field_name: &'a str,
    /// Depth budget available to the field's value
    pub depth: i32,
}

pub trait CrossoverHandler {
    /// Recombines `current` with the same field of one of `donors`, which are all
    /// instances of `site.container`.
    fn crossover(
        &self,
        r: &mut dyn RandomSource,
        grammar: &Grammar,
        donors: &[Arc<TreeNode>],
        site: CrossoverSite<'_>,
        current: &Value,
    ) -> Value;
}

fn handler_error(handler: &str, reason: String) -> GenerationError {
    GenerationError::MetaHandler {
        handler: handler.to_string(),
        reason,
    }
}

/// Integers drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }
}

impl MetaHandler for IntRange {
    fn generate(
        &self,
        r: &mut dyn RandomSource,
        _builder: &TreeBuilder<'_>,
        _depth: i32,
        base: &ValueType,
        field: &str,
    ) -> Result<Value, GenerationError> {
        if *base != ValueType::Int {
            return Err(handler_error("IntRange", format!("field '{}' is not an int", field)));
        }
        Ok(Value::Int(r.randint(self.min, self.max)))
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(value, Value::Int(v) if (self.min..=self.max).contains(v))
    }

    fn mutation_handler(&self) -> Option<&dyn MutationHandler> {
        Some(self)
    }
}

impl MutationHandler for IntRange {
    fn mutate(
        &self,
        r: &mut dyn RandomSource,
        _builder: &TreeBuilder<'_>,
        _depth: i32,
        _base: &ValueType,
        current: &Value,
    ) -> Result<Value, GenerationError> {
        // Redraw, skipping the current value when the range allows it
        let span = self.max.saturating_sub(self.min);
        match current {
            Value::Int(v) if span > 0 && (self.min..=self.max).contains(v) => {
                let drawn = r.randint(self.min, self.max - 1);
                Ok(Value::Int(if drawn >= *v { drawn + 1 } else { drawn }))
            }
            _ => Ok(Value::Int(r.randint(self.min, self.max))),
        }
    }
}

/// Floats drawn uniformly from `[min, max)`; mutation perturbs the current value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
}

impl FloatRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl MetaHandler for FloatRange {
    fn generate(
        &self,
        r: &mut dyn RandomSource,
        _builder: &TreeBuilder<'_>,
        _depth: i32,
        base: &ValueType,
        field: &str,
    ) -> Result<Value, GenerationError> {
        if *base != ValueType::Float {
            return Err(handler_error("FloatRange", format!("field '{}' is not a float", field)));
        }
        Ok(Value::Float(r.random_float(self.min, self.max)))
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(value, Value::Float(v) if *v >= self.min && *v <= self.max)
    }

    fn mutation_handler(&self) -> Option<&dyn MutationHandler> {
        Some(self)
    }
}

impl MutationHandler for FloatRange {
    fn mutate(
        &self,
        r: &mut dyn RandomSource,
        _builder: &TreeBuilder<'_>,
        _depth: i32,
        _base: &ValueType,
        current: &Value,
    ) -> Result<Value, GenerationError> {
        match current {
            Value::Float(v) => {
                let sigma = (self.max - self.min) / 10.0;
                Ok(Value::Float(r.normalvariate(*v, sigma).clamp(self.min, self.max)))
            }
            _ => Ok(Value::Float(r.random_float(self.min, self.max))),
        }
    }
}

/// One of a fixed set of literal options.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRange {
    pub options: Vec<Value>,
}

impl VarRange {
    pub fn new(options: Vec<Value>) -> Self {
        Self { options }
    }

    /// Convenience for the common case of variable names.
    pub fn names(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| Value::Str(n.to_string())).collect())
    }

    fn check_options(&self, base: &ValueType, field: &str) -> Result<(), GenerationError> {
        let fits = |option: &Value| {
            matches!(
                (option, base),
                (Value::Int(_), ValueType::Int)
                    | (Value::Float(_), ValueType::Float)
                    | (Value::Bool(_), ValueType::Bool)
                    | (Value::Str(_), ValueType::Str)
            )
        };
        match self.options.iter().find(|o| !fits(o)) {
            Some(option) => Err(handler_error(
                "VarRange",
                format!("option {:?} does not fit field '{}' of type {:?}", option, field, base),
            )),
            None => Ok(()),
        }
    }
}

impl MetaHandler for VarRange {
    fn generate(
        &self,
        r: &mut dyn RandomSource,
        _builder: &TreeBuilder<'_>,
        _depth: i32,
        base: &ValueType,
        field: &str,
    ) -> Result<Value, GenerationError> {
        self.check_options(base, field)?;
        random::choice(r, &self.options)
            .cloned()
            .ok_or_else(|| handler_error("VarRange", format!("no options for field '{}'", field)))
    }

    fn accepts(&self, value: &Value) -> bool {
        self.options.contains(value)
    }

    fn mutation_handler(&self) -> Option<&dyn MutationHandler> {
        Some(self)
    }
}

impl MutationHandler for VarRange {
    fn mutate(
        &self,
        r: &mut dyn RandomSource,
        builder: &TreeBuilder<'_>,
        depth: i32,
        base: &ValueType,
        current: &Value,
    ) -> Result<Value, GenerationError> {
        self.check_options(base, "")?;
        let others: Vec<&Value> = self.options.iter().filter(|o| *o != current).collect();
        match random::choice(r, &others) {
            Some(v) => Ok((*v).clone()),
            None => self.generate(r, builder, depth, base, ""),
        }
    }
}

/// Lists whose length stays within `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSizeBetween {
    pub min: usize,
    pub max: usize,
}

impl ListSizeBetween {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    fn element_type<'a>(&self, base: &'a ValueType) -> Result<&'a ValueType, GenerationError> {
        match base {
            ValueType::List(inner) => Ok(inner),
            _ => Err(handler_error(
                "ListSizeBetween",
                "annotated field is not a list".to_string(),
            )),
        }
    }

    fn element_depth(inner: &ValueType, depth: i32) -> i32 {
        if inner.is_tree() { depth - 1 } else { depth }
    }

    fn items_of(value: &Value) -> Option<&[Value]> {
        value.as_node().map(|n| n.init_values())
    }
}

impl MetaHandler for ListSizeBetween {
    fn generate(
        &self,
        r: &mut dyn RandomSource,
        builder: &TreeBuilder<'_>,
        depth: i32,
        base: &ValueType,
        _field: &str,
    ) -> Result<Value, GenerationError> {
        let inner = self.element_type(base)?;
        let size = r.randint(self.min as i64, self.max as i64) as usize;
        let element_depth = Self::element_depth(inner, depth);
        let items = (0..size)
            .map(|_| builder.create_child(r, inner, element_depth))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Node(TreeNode::list(builder.grammar(), inner.clone(), items)))
    }

    fn distance_to_terminal(&self, grammar_distance: usize, element_distance: Option<usize>) -> usize {
        match element_distance {
            Some(element) if self.min > 0 => element.saturating_add(1),
            _ => grammar_distance,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        Self::items_of(value).is_some_and(|items| (self.min..=self.max).contains(&items.len()))
    }

    fn mutation_handler(&self) -> Option<&dyn MutationHandler> {
        Some(self)
    }

    fn crossover_handler(&self) -> Option<&dyn CrossoverHandler> {
        Some(self)
    }
}

impl MutationHandler for ListSizeBetween {
    /// Inserts, removes or regenerates a single element, staying within bounds.
    fn mutate(
        &self,
        r: &mut dyn RandomSource,
        builder: &TreeBuilder<'_>,
        depth: i32,
        base: &ValueType,
        current: &Value,
    ) -> Result<Value, GenerationError> {
        let inner = self.element_type(base)?;
        let Some(items) = Self::items_of(current) else {
            return self.generate(r, builder, depth, base, "");
        };
        let element_depth = Self::element_depth(inner, depth);
        let mut items = items.to_vec();

        let mut moves = Vec::with_capacity(3);
        if items.len() < self.max {
            moves.push(ListMove::Insert);
        }
        if items.len() > self.min {
            moves.push(ListMove::Remove);
        }
        if !items.is_empty() {
            moves.push(ListMove::Replace);
        }
        match random::choice(r, &moves) {
            Some(ListMove::Insert) => {
                let position = r.randint(0, items.len() as i64) as usize;
                items.insert(position, builder.create_child(r, inner, element_depth)?);
            }
            Some(ListMove::Remove) => {
                let position = random::index(r, items.len());
                items.remove(position);
            }
            Some(ListMove::Replace) => {
                let position = random::index(r, items.len());
                items[position] = builder.create_child(r, inner, element_depth)?;
            }
            None => return Ok(current.clone()),
        }
        Ok(Value::Node(TreeNode::list(builder.grammar(), inner.clone(), items)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMove {
    Insert,
    Remove,
    Replace,
}

impl CrossoverHandler for ListSizeBetween {
    /// One-point splice of the current list with the same field of a random donor.
    fn crossover(
        &self,
        r: &mut dyn RandomSource,
        grammar: &Grammar,
        donors: &[Arc<TreeNode>],
        site: CrossoverSite<'_>,
        current: &Value,
    ) -> Value {
        let (Some(donor), Some(node)) = (random::choice(r, donors), current.as_node()) else {
            return current.clone();
        };
        let (Some(ours), Some(theirs)) = (
            Self::items_of(current),
            donor.init_values().get(site.field_index).and_then(Self::items_of),
        ) else {
            return current.clone();
        };
        let crate::tree::NodeKind::List(inner) = node.kind() else {
            return current.clone();
        };

        // Donor elements must still fit at this position
        let element_depth = Self::element_depth(inner, site.depth);
        let fits = |v: &Value| match v {
            Value::Node(n) => element_depth >= 0 && n.depth() <= element_depth as usize,
            _ => true,
        };

        let cut_ours = r.randint(0, ours.len() as i64) as usize;
        let cut_theirs = r.randint(0, theirs.len() as i64) as usize;
        let mut items: Vec<Value> = ours[..cut_ours]
            .iter()
            .cloned()
            .chain(theirs[cut_theirs..].iter().filter(|&v| fits(v)).cloned())
            .collect();
        items.truncate(self.max);
        if items.len() < self.min {
            return current.clone();
        }
        Value::Node(TreeNode::list(grammar, inner.clone(), items))
    }
}
