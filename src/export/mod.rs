//! Population export for persisting generated or evolved genotypes.
//!
//! Trees are written with their structure (production ids and argument values),
//! a readable rendering, and the configuration they were produced under, so a run
//! can be inspected or replayed later.

use crate::config::TreeConfig;
use crate::grammar::Grammar;
use crate::tree::Tree;
use serde::Serialize;
use std::path::Path;

/// Snapshot of a population, ready for serialization.
#[derive(Serialize)]
pub struct GenotypeExport {
    /// Layout version of this document, bumped whenever a field changes meaning
    pub schema_version: String,
    /// Seconds since the Unix epoch at the moment the population was snapshotted
    pub generated_at: u64,
    /// Name of the grammar's starting symbol
    pub starting_symbol: String,
    /// Configuration the trees were produced under
    pub config: TreeConfig,
    pub individuals: Vec<ExportedTree>,
}

#[derive(Serialize)]
pub struct ExportedTree {
    /// Position in the exported population (1 = first)
    pub rank: usize,
    /// `Name(field=value, ...)` rendering
    pub display: String,
    pub depth: usize,
    pub node_count: usize,
    pub tree: Tree,
}

impl GenotypeExport {
    /// Creates a new export from a population.
    ///
    /// # Arguments
    /// * `grammar` - The grammar the trees conform to, used for rendering
    /// * `config` - Configuration snapshot
    /// * `population` - Trees in the order they should be ranked
    ///
    /// # Returns
    /// `GenotypeExport` holding one entry per tree, ranked in population order
    pub fn new(grammar: &Grammar, config: &TreeConfig, population: &[Tree]) -> Self {
        let individuals = population
            .iter()
            .enumerate()
            .map(|(i, tree)| ExportedTree {
                rank: i + 1,
                display: tree.display(grammar).to_string(),
                depth: tree.depth(),
                node_count: tree.node_count(),
                tree: Tree::clone(tree),
            })
            .collect();

        Self {
            schema_version: "1.0.0".to_string(),
            generated_at: chrono::Utc::now().timestamp() as u64,
            starting_symbol: grammar.name(grammar.starting_symbol()).to_string(),
            config: config.clone(),
            individuals,
        }
    }
}

/// Writes a genotype export to a JSON file.
pub fn write_export_to_json(
    export: &GenotypeExport,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(export)?;
    std::fs::write(output_path, json)?;
    Ok(())
}
