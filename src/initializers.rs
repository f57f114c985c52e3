use crate::random::{RandomSource, StdRandomSource};
use crate::representation::TreeBasedRepresentation;
use crate::tree::builder::GenerationMethod;
use crate::tree::{GenerationError, Tree};
use log::info;
use rayon::prelude::*;

/// Builds the first population of a run.
pub trait PopulationInitializer: Sync {
    /// Creates the `index`-th of `size` individuals.
    fn create_individual(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        index: usize,
        size: usize,
    ) -> Result<Tree, GenerationError>;

    fn name(&self) -> &'static str;

    /// Creates `size` individuals sequentially from one random source.
    fn initialize(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        size: usize,
    ) -> Result<Vec<Tree>, GenerationError> {
        info!("Initializing population of {} with {}", size, self.name());
        (0..size)
            .map(|i| self.create_individual(repr, r, i, size))
            .collect()
    }

    /// Creates `size` individuals in parallel. Individual `i` draws from its own
    /// source seeded with `base_seed + i`, so the result does not depend on scheduling.
    fn initialize_par(
        &self,
        repr: &TreeBasedRepresentation,
        base_seed: u64,
        size: usize,
    ) -> Result<Vec<Tree>, GenerationError> {
        info!(
            "Initializing population of {} with {} in parallel (base seed {})",
            size,
            self.name(),
            base_seed
        );
        (0..size)
            .into_par_iter()
            .map(|i| {
                let mut r = StdRandomSource::new(base_seed.wrapping_add(i as u64));
                self.create_individual(repr, &mut r, i, size)
            })
            .collect()
    }
}

/// Every individual grown up to the configured max depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrowInitializer;

impl PopulationInitializer for GrowInitializer {
    fn create_individual(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        _index: usize,
        _size: usize,
    ) -> Result<Tree, GenerationError> {
        repr.create_genotype_with(r, repr.config().max_depth, GenerationMethod::Grow)
    }

    fn name(&self) -> &'static str {
        "grow"
    }
}

/// Every individual filled out to the configured max depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullInitializer;

impl PopulationInitializer for FullInitializer {
    fn create_individual(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        _index: usize,
        _size: usize,
    ) -> Result<Tree, GenerationError> {
        repr.create_genotype_with(r, repr.config().max_depth, GenerationMethod::Full)
    }

    fn name(&self) -> &'static str {
        "full"
    }
}

/// Every individual carries one random branch to the configured max depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionIndependentGrowInitializer;

impl PopulationInitializer for PositionIndependentGrowInitializer {
    fn create_individual(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        _index: usize,
        _size: usize,
    ) -> Result<Tree, GenerationError> {
        repr.create_genotype_with(r, repr.config().max_depth, GenerationMethod::PositionIndependentGrow)
    }

    fn name(&self) -> &'static str {
        "position-independent grow"
    }
}

/// Depth ceiling of the `index`-th of `size` individuals, ramped evenly from
/// `min_depth` to `max_depth`.
pub fn ramped_depth(min_depth: i32, max_depth: i32, index: usize, size: usize) -> i32 {
    if size <= 1 || max_depth <= min_depth {
        return max_depth;
    }
    let span = (max_depth - min_depth) as i64;
    min_depth + (index as i64 * span / (size as i64 - 1)) as i32
}

fn min_target_depth(repr: &TreeBasedRepresentation) -> i32 {
    repr.grammar()
        .distance_to_terminal(repr.target())
        .min(i32::MAX as usize) as i32
}

/// Grown individuals whose depth ceilings are ramped from the target's minimum
/// depth to the configured max depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct RampedInitializer;

impl PopulationInitializer for RampedInitializer {
    fn create_individual(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        index: usize,
        size: usize,
    ) -> Result<Tree, GenerationError> {
        let depth = ramped_depth(min_target_depth(repr), repr.config().max_depth, index, size);
        repr.create_genotype_with(r, depth, GenerationMethod::Grow)
    }

    fn name(&self) -> &'static str {
        "ramped"
    }
}

/// Ramped depth ceilings as in `RampedInitializer`; even positions use full,
/// odd positions grow.
#[derive(Debug, Clone, Copy, Default)]
pub struct RampedHalfAndHalfInitializer;

impl PopulationInitializer for RampedHalfAndHalfInitializer {
    fn create_individual(
        &self,
        repr: &TreeBasedRepresentation,
        r: &mut dyn RandomSource,
        index: usize,
        size: usize,
    ) -> Result<Tree, GenerationError> {
        let depth = ramped_depth(min_target_depth(repr), repr.config().max_depth, index, size);
        let method = if index % 2 == 0 {
            GenerationMethod::Full
        } else {
            GenerationMethod::Grow
        };
        repr.create_genotype_with(r, depth, method)
    }

    fn name(&self) -> &'static str {
        "ramped half-and-half"
    }
}
