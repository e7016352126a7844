//! Composition configuration.
//!
//! Loaded from YAML, e.g.
//!
//! ```yaml
//! identical_value_properties: [image, flavor]
//! strategies:
//!   SingleSubstitution: single_substitution
//!   ScalingInstances: scaling_instances
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::graph::GraphError;
use crate::strategy::CompositionMode;

/// Strategy implementations a mode can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// One substitution template + abstract node per batch entry.
    SingleSubstitution,
    /// One substitution template + abstract node for the whole batch.
    ScalingInstances,
    /// Nested template unification.
    NestedSingleCompute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    /// Properties shared by every instance of a batch, fed by one scalar
    /// `vm_<name>_name` input instead of a per-instance list.
    pub identical_value_properties: Vec<String>,

    /// Mode -> strategy. A mode missing here composes nothing.
    pub strategies: BTreeMap<CompositionMode, StrategyKind>,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        let strategies = BTreeMap::from([
            (CompositionMode::SingleSubstitution, StrategyKind::SingleSubstitution),
            (CompositionMode::CatalogInstances, StrategyKind::SingleSubstitution),
            (CompositionMode::ScalingInstances, StrategyKind::ScalingInstances),
            (CompositionMode::NestedSingleCompute, StrategyKind::NestedSingleCompute),
        ]);
        CompositionConfig {
            identical_value_properties: vec!["image".to_string(), "flavor".to_string()],
            strategies,
        }
    }
}

impl CompositionConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, GraphError> {
        let config: CompositionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    //identical value inputs are parsed back as vm_[a-z]+_name
    fn validate(&self) -> Result<(), GraphError> {
        for name in &self.identical_value_properties {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase()) {
                return Err(GraphError::InvalidConfig(format!(
                    "identical value property `{name}` must be lowercase letters only"
                )));
            }
        }
        Ok(())
    }

    pub fn strategy_for(&self, mode: CompositionMode) -> Option<StrategyKind> {
        self.strategies.get(&mode).copied()
    }

    pub fn is_identical_value_property(&self, property_name: &str) -> bool {
        self.identical_value_properties.iter().any(|p| p == property_name)
    }
}
