// consolidation data: per-entity connectivity as seen before any rewrite.
// produced upstream, consumed read-only by the composition passes.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::graph::{GraphError, RequirementAssignment};
use crate::core::types::{port_type_from_id, EntityKind};

/// A requirement as it sat on its owning node template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementAssignmentData {
    pub requirement_id: String,
    pub requirement: RequirementAssignment,
}

impl RequirementAssignmentData {
    pub fn new(requirement_id: impl Into<String>, requirement: RequirementAssignment) -> Self {
        RequirementAssignmentData { requirement_id: requirement_id.into(), requirement }
    }
}

/// `field_name` is the property (or output parameter) holding the expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAttrFuncData {
    pub field_name: String,
    pub attribute_name: String,
}

impl GetAttrFuncData {
    pub fn new(field_name: impl Into<String>, attribute_name: impl Into<String>) -> Self {
        GetAttrFuncData { field_name: field_name.into(), attribute_name: attribute_name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConsolidationData {
    pub node_template_id: String,
    /// target node id -> requirements this entity held towards it
    pub nodes_connected_out: BTreeMap<String, Vec<RequirementAssignmentData>>,
    /// source node id -> requirements the source held towards this entity
    pub nodes_connected_in: BTreeMap<String, Vec<RequirementAssignmentData>>,
    /// source node id -> attributes of this entity it reads
    pub nodes_get_attr_in: BTreeMap<String, Vec<GetAttrFuncData>>,
    pub output_parameters_get_attr_in: Vec<GetAttrFuncData>,
    pub group_ids: Vec<String>,
}

impl EntityConsolidationData {
    pub fn new(node_template_id: impl Into<String>) -> Self {
        EntityConsolidationData { node_template_id: node_template_id.into(), ..Default::default() }
    }
}

pub trait ConsolidationEntity {
    fn entity(&self) -> &EntityConsolidationData;
    fn kind(&self) -> EntityKind;

    fn node_template_id(&self) -> &str {
        &self.entity().node_template_id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeTemplateConsolidationData {
    #[serde(flatten)]
    pub entity: EntityConsolidationData,
    /// volume node id -> attachment requirements
    pub volumes: BTreeMap<String, Vec<RequirementAssignmentData>>,
    /// port type -> attached port node ids
    pub ports: BTreeMap<String, Vec<String>>,
}

impl ComputeTemplateConsolidationData {
    pub fn new(node_template_id: impl Into<String>) -> Self {
        ComputeTemplateConsolidationData {
            entity: EntityConsolidationData::new(node_template_id),
            ..Default::default()
        }
    }

    pub fn has_port(&self, port_id: &str) -> bool {
        self.ports.values().flatten().any(|p| p == port_id)
    }

    /// Port type this compute files `port_id` under, guessed from the id otherwise.
    pub fn port_type_of(&self, port_id: &str) -> String {
        self.ports
            .iter()
            .find(|(_, ids)| ids.iter().any(|p| p == port_id))
            .map(|(port_type, _)| port_type.clone())
            .unwrap_or_else(|| port_type_from_id(port_id))
    }

    pub fn port_count(&self, port_type: &str) -> usize {
        self.ports.get(port_type).map_or(0, Vec::len)
    }

    /// Port type, or the port id itself when this compute has several ports of
    /// that type.
    pub fn port_key(&self, port_id: &str) -> String {
        let port_type = self.port_type_of(port_id);
        if self.port_count(&port_type) > 1 {
            port_id.to_string()
        } else {
            port_type
        }
    }

    /// Id of a port's copy inside a substitution template, `<computeSuffix>_<portKey>`.
    pub fn local_port_id(&self, compute_suffix: &str, port_id: &str) -> String {
        format!("{compute_suffix}_{}", self.port_key(port_id))
    }
}

impl ConsolidationEntity for ComputeTemplateConsolidationData {
    fn entity(&self) -> &EntityConsolidationData {
        &self.entity
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Compute
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortTemplateConsolidationData {
    #[serde(flatten)]
    pub entity: EntityConsolidationData,
}

impl PortTemplateConsolidationData {
    pub fn new(node_template_id: impl Into<String>) -> Self {
        PortTemplateConsolidationData { entity: EntityConsolidationData::new(node_template_id) }
    }
}

impl ConsolidationEntity for PortTemplateConsolidationData {
    fn entity(&self) -> &EntityConsolidationData {
        &self.entity
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Port
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NestedTemplateConsolidationData {
    #[serde(flatten)]
    pub entity: EntityConsolidationData,
}

impl NestedTemplateConsolidationData {
    pub fn new(node_template_id: impl Into<String>) -> Self {
        NestedTemplateConsolidationData { entity: EntityConsolidationData::new(node_template_id) }
    }
}

impl ConsolidationEntity for NestedTemplateConsolidationData {
    fn entity(&self) -> &EntityConsolidationData {
        &self.entity
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Nested
    }
}

/// One consolidatable unit. Flat units carry a compute and its ports, nested
/// units carry only the nested node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiedCompositionData {
    pub compute: Option<ComputeTemplateConsolidationData>,
    pub ports: Vec<PortTemplateConsolidationData>,
    pub nested: Option<NestedTemplateConsolidationData>,
}

impl UnifiedCompositionData {
    pub fn with_compute(compute: ComputeTemplateConsolidationData) -> Self {
        UnifiedCompositionData { compute: Some(compute), ..Default::default() }
    }

    pub fn with_nested(nested: NestedTemplateConsolidationData) -> Self {
        UnifiedCompositionData { nested: Some(nested), ..Default::default() }
    }

    pub fn compute(&self) -> Result<&ComputeTemplateConsolidationData, GraphError> {
        self.compute.as_ref().ok_or(GraphError::MissingCompute)
    }

    /// Compute first, then ports in order.
    pub fn flat_entities(&self) -> Vec<&dyn ConsolidationEntity> {
        let mut out: Vec<&dyn ConsolidationEntity> = Vec::new();
        if let Some(compute) = &self.compute {
            out.push(compute);
        }
        for port in &self.ports {
            out.push(port);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileComputeConsolidationData {
    /// compute type -> compute node id -> data
    pub types: BTreeMap<String, BTreeMap<String, ComputeTemplateConsolidationData>>,
}

impl FileComputeConsolidationData {
    pub fn compute_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// The compute a port is attached to, with that compute's type.
    pub fn compute_owning_port(
        &self,
        port_id: &str,
    ) -> Option<(&str, &ComputeTemplateConsolidationData)> {
        self.types.iter().find_map(|(compute_type, computes)| {
            computes
                .values()
                .find(|c| c.has_port(port_id))
                .map(|c| (compute_type.as_str(), c))
        })
    }
}

/// Consolidation data of a whole translation job, keyed by template file name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationData {
    pub files: BTreeMap<String, FileComputeConsolidationData>,
}

impl ConsolidationData {
    pub fn file(&self, file_name: &str) -> Option<&FileComputeConsolidationData> {
        self.files.get(file_name)
    }

    pub fn add_compute(
        &mut self,
        file_name: &str,
        compute_type: &str,
        data: ComputeTemplateConsolidationData,
    ) {
        self.files
            .entry(file_name.to_string())
            .or_default()
            .types
            .entry(compute_type.to_string())
            .or_default()
            .insert(data.entity.node_template_id.clone(), data);
    }
}
