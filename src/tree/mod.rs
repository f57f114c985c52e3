pub mod builder;
pub mod crossover;
pub mod mutation;
pub(crate) mod selection;

use crate::grammar::metahandlers::MetaHandler;
use crate::grammar::{Grammar, SymbolId, ValueType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A genotype: the shared root of an immutable tree.
pub type Tree = Arc<TreeNode>;

/// Attempts made to regenerate a subtree before an operator gives up and keeps the original.
pub const MAX_REGENERATION_ATTEMPTS: usize = 5;

#[derive(Error, Debug, PartialEq)]
pub enum GenerationError {
    #[error("No depth sufficient for '{symbol}' in this grammar (provided: {provided}, required: {required})")]
    DepthInfeasible {
        symbol: String,
        provided: i32,
        required: usize,
    },
    #[error("No productions for '{symbol}' at depth {depth} (candidates and required depths: {candidates:?})")]
    NoValidProduction {
        symbol: String,
        depth: i32,
        candidates: Vec<(String, usize)>,
    },
    #[error("Symbol '{0}' is not part of the grammar")]
    UnknownSymbol(String),
    #[error("Metahandler {handler} failed: {reason}")]
    MetaHandler { handler: String, reason: String },
}

/// What a node is an instance of: a concrete production, or a homogeneous list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum NodeKind {
    Production(SymbolId),
    List(ValueType),
}

/// A constructor argument: either a terminal payload or a child node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Node(Arc<TreeNode>),
}

impl Value {
    pub fn as_node(&self) -> Option<&Arc<TreeNode>> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<Arc<TreeNode>> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// Structural metadata cached on every node. It depends only on the node's own
/// subtree and the grammar, so a node built from labeled children is itself labeled.
#[derive(Clone, Default)]
struct NodeMeta {
    node_count: usize,
    weighted_node_count: usize,
    depth: usize,
    distance_to_terminal: usize,
    /// Every strict descendant, grouped by exact kind
    types_this_way: BTreeMap<NodeKind, Vec<Arc<TreeNode>>>,
}

impl fmt::Debug for NodeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMeta")
            .field("node_count", &self.node_count)
            .field("weighted_node_count", &self.weighted_node_count)
            .field("depth", &self.depth)
            .field("distance_to_terminal", &self.distance_to_terminal)
            .field("indexed_kinds", &self.types_this_way.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    kind: NodeKind,
    values: Vec<Value>,
    #[serde(skip)]
    meta: NodeMeta,
}

/// Structural equality; cached metadata is ignored.
impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.values == other.values
    }
}

/// Where a value sits in its parent: the declared type plus the declaring field's metahandler.
#[derive(Clone, Copy)]
pub(crate) struct Site<'a> {
    pub ty: &'a ValueType,
    pub handler: Option<&'a Arc<dyn MetaHandler>>,
    pub name: &'a str,
}

impl<'a> Site<'a> {
    pub fn root(ty: &'a ValueType) -> Self {
        Self {
            ty,
            handler: None,
            name: "",
        }
    }

    /// Whether `node` could legally occupy this site.
    pub fn admits(&self, grammar: &Grammar, node: &Arc<TreeNode>) -> bool {
        let kind_fits = match (self.ty, &node.kind) {
            (ValueType::Symbol(declared), NodeKind::Production(concrete)) => {
                grammar.is_subtype(*concrete, *declared)
            }
            (ValueType::List(expected), NodeKind::List(element)) => **expected == *element,
            _ => false,
        };
        kind_fits
            && self
                .handler
                .is_none_or(|h| h.accepts(&Value::Node(Arc::clone(node))))
    }
}

fn declared_type<'a>(grammar: &'a Grammar, kind: &'a NodeKind, position: usize) -> Option<&'a ValueType> {
    match kind {
        NodeKind::Production(symbol) => grammar
            .production(*symbol)
            .and_then(|p| p.fields.get(position))
            .map(|f| &f.ty),
        NodeKind::List(element) => Some(element),
    }
}

impl TreeNode {
    /// Builds a node of a concrete production from already-labeled arguments.
    pub fn production(grammar: &Grammar, symbol: SymbolId, values: Vec<Value>) -> Arc<TreeNode> {
        Self::assemble(grammar, NodeKind::Production(symbol), values)
    }

    pub fn list(grammar: &Grammar, element: ValueType, items: Vec<Value>) -> Arc<TreeNode> {
        Self::assemble(grammar, NodeKind::List(element), items)
    }

    fn assemble(grammar: &Grammar, kind: NodeKind, values: Vec<Value>) -> Arc<TreeNode> {
        let meta = Self::stamp(grammar, &kind, &values);
        Arc::new(TreeNode { kind, values, meta })
    }

    fn stamp(grammar: &Grammar, kind: &NodeKind, values: &[Value]) -> NodeMeta {
        let distance_to_terminal = match kind {
            NodeKind::Production(symbol) => grammar.distance_to_terminal(*symbol),
            NodeKind::List(_) => 0,
        };
        let mut meta = NodeMeta {
            node_count: 1,
            weighted_node_count: distance_to_terminal.saturating_add(1),
            depth: 0,
            distance_to_terminal,
            types_this_way: BTreeMap::new(),
        };

        for (position, value) in values.iter().enumerate() {
            let Value::Node(child) = value else {
                continue;
            };
            let extra = match (declared_type(grammar, kind, position), &child.kind) {
                (Some(ty), NodeKind::Production(concrete)) => grammar.expansion_cost(ty, *concrete),
                _ => 0,
            };
            meta.depth = meta.depth.max(child.meta.depth + 1 + extra);
            meta.node_count += child.meta.node_count;
            meta.weighted_node_count = meta
                .weighted_node_count
                .saturating_add(child.meta.weighted_node_count);

            meta.types_this_way
                .entry(child.kind.clone())
                .or_default()
                .push(Arc::clone(child));
            for (k, nodes) in &child.meta.types_this_way {
                meta.types_this_way
                    .entry(k.clone())
                    .or_default()
                    .extend(nodes.iter().cloned());
            }
        }
        meta
    }

    /// Copy of this node with the argument at `position` replaced. Untouched children are shared.
    /// An out-of-range `position` leaves the arguments as they are.
    pub fn with_value(&self, grammar: &Grammar, position: usize, value: Value) -> Arc<TreeNode> {
        let mut values = self.values.clone();
        if let Some(slot) = values.get_mut(position) {
            *slot = value;
        }
        Self::assemble(grammar, self.kind.clone(), values)
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The production this node instantiates, `None` for lists.
    pub fn symbol(&self) -> Option<SymbolId> {
        match self.kind {
            NodeKind::Production(symbol) => Some(symbol),
            NodeKind::List(_) => None,
        }
    }

    /// Constructor arguments (or list items), in declared field order.
    pub fn init_values(&self) -> &[Value] {
        &self.values
    }

    pub fn node_count(&self) -> usize {
        self.meta.node_count
    }

    pub fn weighted_node_count(&self) -> usize {
        self.meta.weighted_node_count
    }

    pub fn depth(&self) -> usize {
        self.meta.depth
    }

    pub fn distance_to_terminal(&self) -> usize {
        self.meta.distance_to_terminal
    }

    pub fn types_this_way(&self) -> &BTreeMap<NodeKind, Vec<Arc<TreeNode>>> {
        &self.meta.types_this_way
    }

    /// Strict descendants of exactly `kind`, in index order.
    pub fn subtrees_of(&self, kind: &NodeKind) -> &[Arc<TreeNode>] {
        self.meta
            .types_this_way
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn child_site<'a>(&'a self, grammar: &'a Grammar, position: usize) -> Option<Site<'a>> {
        match &self.kind {
            NodeKind::Production(symbol) => {
                let field = grammar.production(*symbol)?.fields.get(position)?;
                Some(Site {
                    ty: &field.ty,
                    handler: field.handler.as_ref(),
                    name: &field.name,
                })
            }
            NodeKind::List(element) => Some(Site::root(element)),
        }
    }

    pub fn display<'a>(&'a self, grammar: &'a Grammar) -> TreeDisplay<'a> {
        TreeDisplay { node: self, grammar }
    }
}

/// Result of a full relabeling pass.
#[derive(Debug, Clone)]
pub struct Relabeled {
    pub root: Arc<TreeNode>,
    pub depth: usize,
    pub node_count: usize,
    pub distance_to_terminal: usize,
}

/// Recomputes the metadata of every node, bottom-up, in one traversal.
pub fn relabel(grammar: &Grammar, root: &TreeNode) -> Relabeled {
    let root = relabel_node(grammar, root);
    Relabeled {
        depth: root.depth(),
        node_count: root.node_count(),
        distance_to_terminal: root.distance_to_terminal(),
        root,
    }
}

fn relabel_node(grammar: &Grammar, node: &TreeNode) -> Arc<TreeNode> {
    let values = node
        .values
        .iter()
        .map(|value| match value {
            Value::Node(child) => Value::Node(relabel_node(grammar, child)),
            other => other.clone(),
        })
        .collect();
    TreeNode::assemble(grammar, node.kind.clone(), values)
}

/// `Name(field=value, ...)` rendering of a tree.
pub struct TreeDisplay<'a> {
    node: &'a TreeNode,
    grammar: &'a Grammar,
}

impl fmt::Display for TreeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node.kind {
            NodeKind::Production(symbol) => {
                write!(f, "{}(", self.grammar.name(*symbol))?;
                let fields = self.grammar.production(*symbol).map(|p| p.fields.as_slice());
                for (i, value) in self.node.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(field) = fields.and_then(|fs| fs.get(i)) {
                        write!(f, "{}=", field.name)?;
                    }
                    self.write_value(f, value)?;
                }
                write!(f, ")")
            }
            NodeKind::List(_) => {
                write!(f, "[")?;
                for (i, value) in self.node.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.write_value(f, value)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl TreeDisplay<'_> {
    fn write_value(&self, f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
        match value {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Node(node) => write!(f, "{}", node.display(self.grammar)),
        }
    }
}
