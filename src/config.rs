//! Mapper configuration.

use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::pg::literal::DEFAULT_ELEMENT_CAPACITY;

/// Default limit on composite/array nesting during coercion.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Mapper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Maximum composite/array nesting before failing with `SchemaTooDeep`
    pub max_depth: usize,
    /// Initial capacity of the literal parser's element buffer
    pub element_capacity: usize,
    /// Fail when a non-optional field has no column in the row
    pub strict_columns: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            element_capacity: DEFAULT_ELEMENT_CAPACITY,
            strict_columns: true,
        }
    }
}

impl MapperConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| MapError::not_convertible(json, "MapperConfig", e))
    }

    /// Set the maximum nesting depth.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the literal parser's element buffer capacity.
    pub fn element_capacity(mut self, capacity: usize) -> Self {
        self.element_capacity = capacity;
        self
    }

    /// Set whether missing columns for non-optional fields are errors.
    pub fn strict_columns(mut self, strict: bool) -> Self {
        self.strict_columns = strict;
        self
    }
}
