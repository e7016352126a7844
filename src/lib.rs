//! Unified composition for translated service templates.
//!
//! Consolidates repeated compute/port (and nested sub-template) fragments of a
//! service template into a single substitutable abstraction: a new substitution
//! template, one abstract node template standing in for the whole batch, and the
//! connectivity rewiring that keeps every cross reference pointing somewhere real.

pub mod config;
pub mod core;
pub mod strategy;
pub mod substitution;

pub use crate::config::{CompositionConfig, StrategyKind};
pub use crate::core::consolidation::{
    ComputeTemplateConsolidationData, ConsolidationData, EntityConsolidationData,
    FileComputeConsolidationData, GetAttrFuncData, NestedTemplateConsolidationData,
    PortTemplateConsolidationData, RequirementAssignmentData, UnifiedCompositionData,
};
pub use crate::core::context::CompositionContext;
pub use crate::core::graph::{GraphError, NodeTemplate, NodeType, ServiceTemplate};
pub use crate::core::propagate::update_unified_abstract_nodes_connectivity;
pub use crate::core::types::EntityKind;
pub use crate::core::value::{Function, GetAttribute, Value};
pub use crate::strategy::{CompositionMode, CompositionOutcome, create_unified_composition};
