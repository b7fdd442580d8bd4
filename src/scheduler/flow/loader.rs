//! Flow loader - YAML file loading and parsing
//!
//! This module handles loading flow definitions from YAML files.

use super::types::NodeDefinition;
use crate::core::error::FlowError;
use std::fs;
use std::path::Path;

/// Loads flow definitions from YAML files
pub struct FlowLoader;

impl FlowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a flow definition from a YAML file
    pub fn load_flow<P: AsRef<Path>>(&self, path: P) -> Result<NodeDefinition, FlowError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a flow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<NodeDefinition, FlowError> {
        let def: NodeDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for FlowLoader {
    fn default() -> Self {
        Self::new()
    }
}
