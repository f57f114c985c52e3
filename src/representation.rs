use crate::config::{ConfigError, TreeConfig};
use crate::grammar::{Grammar, SymbolId};
use crate::random::RandomSource;
use crate::tree::builder::{GenerationMethod, TreeBuilder};
use crate::tree::crossover::TreeCrossover;
use crate::tree::mutation::TreeMutator;
use crate::tree::{GenerationError, Tree};
use log::info;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepresentationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// How individuals are created and decoded, as seen by an evolutionary loop.
pub trait Representation {
    type Genotype;
    type Phenotype;
    type Error;

    fn create_genotype(&self, r: &mut dyn RandomSource) -> Result<Self::Genotype, Self::Error>;

    fn genotype_to_phenotype(&self, genotype: &Self::Genotype) -> Self::Phenotype;
}

pub trait RepresentationWithMutation: Representation {
    /// Returns a new genotype; `genotype` itself is never modified.
    fn mutate(&self, r: &mut dyn RandomSource, genotype: &Self::Genotype) -> Self::Genotype;
}

pub trait RepresentationWithCrossover: Representation {
    /// Returns two new genotypes, the first based on `a` and the second on `b`.
    fn crossover(
        &self,
        r: &mut dyn RandomSource,
        a: &Self::Genotype,
        b: &Self::Genotype,
    ) -> (Self::Genotype, Self::Genotype);
}

/// Trees as genotypes; the phenotype is the tree itself.
#[derive(Debug, Clone)]
pub struct TreeBasedRepresentation {
    grammar: Arc<Grammar>,
    config: TreeConfig,
    target: SymbolId,
    specific: Option<SymbolId>,
}

impl TreeBasedRepresentation {
    /// Creates a new `TreeBasedRepresentation`
    ///
    /// # Arguments
    /// * `grammar` - The grammar every genotype conforms to
    /// * `config` - Depth ceiling, selection weighting and the optional target/specific types
    ///
    /// # Returns
    /// `Result<TreeBasedRepresentation, RepresentationError>` - fails on an invalid config
    /// or when a configured type name is not part of the grammar
    pub fn new(mut grammar: Grammar, config: TreeConfig) -> Result<Self, RepresentationError> {
        config.validate()?;
        grammar.set_expansion_depthing(config.expansion_depthing);

        let resolve = |name: &str| {
            grammar
                .symbol(name)
                .ok_or_else(|| GenerationError::UnknownSymbol(name.to_string()))
        };
        let target = match &config.target_type {
            Some(name) => resolve(name)?,
            None => grammar.starting_symbol(),
        };
        let specific = config.specific_type.as_deref().map(resolve).transpose()?;

        if !fits_under(&grammar, target, grammar.starting_symbol()) {
            return Err(ConfigError::Invalid(format!(
                "target_type '{}' is not a subtype of the starting symbol '{}'",
                grammar.name(target),
                grammar.name(grammar.starting_symbol())
            ))
            .into());
        }
        if let Some(s) = specific {
            if grammar.production(s).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "specific_type '{}' must name a concrete production",
                    grammar.name(s)
                ))
                .into());
            }
        }

        info!(
            "Tree representation over '{}' (max depth {}, min tree depth {})",
            grammar.name(target),
            config.max_depth,
            grammar.min_tree_depth()
        );
        Ok(Self {
            grammar: Arc::new(grammar),
            config,
            target,
            specific,
        })
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn target(&self) -> SymbolId {
        self.target
    }

    pub fn builder(&self) -> TreeBuilder<'_> {
        TreeBuilder::new(&self.grammar, &self.config)
    }

    /// Creates a genotype with an explicit depth ceiling and generation method.
    pub fn create_genotype_with(
        &self,
        r: &mut dyn RandomSource,
        max_depth: i32,
        method: GenerationMethod,
    ) -> Result<Tree, GenerationError> {
        self.builder()
            .with_method(method)
            .random_individual(r, self.target, max_depth)
    }
}

/// Whether every node of type `symbol` may stand where `declared` is expected.
fn fits_under(grammar: &Grammar, symbol: SymbolId, declared: SymbolId) -> bool {
    if grammar.is_abstract(symbol) {
        symbol == declared
            || grammar
                .alternatives_of(symbol)
                .iter()
                .all(|c| grammar.is_subtype(*c, declared))
    } else {
        grammar.is_subtype(symbol, declared)
    }
}

impl Representation for TreeBasedRepresentation {
    type Genotype = Tree;
    type Phenotype = Tree;
    type Error = GenerationError;

    fn create_genotype(&self, r: &mut dyn RandomSource) -> Result<Tree, GenerationError> {
        self.create_genotype_with(r, self.config.max_depth, GenerationMethod::Grow)
    }

    fn genotype_to_phenotype(&self, genotype: &Tree) -> Tree {
        Arc::clone(genotype)
    }
}

impl RepresentationWithMutation for TreeBasedRepresentation {
    fn mutate(&self, r: &mut dyn RandomSource, genotype: &Tree) -> Tree {
        let mutator = TreeMutator::new(self.builder(), self.target);
        match self.specific {
            Some(specific) => mutator.mutate_specific_type(r, genotype, specific),
            None => mutator.mutate(r, genotype),
        }
    }
}

impl RepresentationWithCrossover for TreeBasedRepresentation {
    fn crossover(&self, r: &mut dyn RandomSource, a: &Tree, b: &Tree) -> (Tree, Tree) {
        let crossover = TreeCrossover::new(self.builder(), self.target);
        match self.specific {
            Some(specific) => crossover.crossover_specific_type(r, a, b, specific),
            None => crossover.crossover(r, a, b),
        }
    }
}
