use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Knobs of the tree representation. Every field has a default, so a config file
/// only needs to mention what it overrides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TreeConfig {
    /// Depth ceiling for generation, mutation and crossover
    pub max_depth: i32,
    /// Bias mutation points toward nodes far from the terminal frontier
    pub depth_aware_mutation: bool,
    /// Same bias, applied to crossover cut points
    pub depth_aware_crossover: bool,
    /// Whether picking a concrete production for an abstract slot consumes depth
    pub expansion_depthing: bool,
    /// Declared type of the root position; defaults to the grammar's starting symbol
    pub target_type: Option<String>,
    /// When set, operators favour editing occurrences of this production
    pub specific_type: Option<String>,
    /// Upper bound on list length when no metahandler governs the list
    pub max_list_size: usize,
    /// Inclusive range for unannotated integers
    pub int_range: (i64, i64),
    /// Half-open range for unannotated floats
    pub float_range: (f64, f64),
    pub max_string_length: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            depth_aware_mutation: false,
            depth_aware_crossover: false,
            expansion_depthing: false,
            target_type: None,
            specific_type: None,
            max_list_size: 8,
            int_range: (i64::MIN + 1, i64::MAX),
            float_range: (-100.0, 100.0),
            max_string_length: 8,
        }
    }
}

impl TreeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: TreeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.int_range.0 > self.int_range.1 {
            return Err(ConfigError::Invalid(format!(
                "int_range lower bound {} exceeds upper bound {}",
                self.int_range.0, self.int_range.1
            )));
        }
        let (lo, hi) = self.float_range;
        if !lo.is_finite() || !hi.is_finite() || lo > hi {
            return Err(ConfigError::Invalid(format!(
                "float_range [{}, {}) is not a valid finite range",
                lo, hi
            )));
        }
        if self.max_list_size == 0 {
            return Err(ConfigError::Invalid("max_list_size must be positive".to_string()));
        }
        Ok(())
    }
}
