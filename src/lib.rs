//! Grammar-guided tree genotypes: depth-bounded random generation, mutation and
//! crossover over trees whose shape is dictated by a typed grammar.

pub mod config;
pub mod export;
pub mod grammar;
pub mod initializers;
pub mod random;
pub mod representation;
pub mod tree;

pub use config::{ConfigError, TreeConfig};
pub use grammar::metahandlers::{FloatRange, IntRange, ListSizeBetween, MetaHandler, VarRange};
pub use grammar::{FieldSpec, Grammar, GrammarBuilder, GrammarError, SymbolId, ValueType};
pub use initializers::{
    FullInitializer, GrowInitializer, PopulationInitializer, PositionIndependentGrowInitializer,
    RampedHalfAndHalfInitializer, RampedInitializer, ramped_depth,
};
pub use random::{RandomSource, StdRandomSource};
pub use representation::{
    Representation, RepresentationError, RepresentationWithCrossover, RepresentationWithMutation,
    TreeBasedRepresentation,
};
pub use tree::builder::{GenerationMethod, TreeBuilder};
pub use tree::crossover::{TreeCrossover, find_in_tree, find_in_tree_exact};
pub use tree::mutation::TreeMutator;
pub use tree::{GenerationError, NodeKind, Tree, TreeNode, Value, relabel};
