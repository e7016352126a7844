// service template model (TOSCA subset) + the error type every pass returns
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{template_file_name, TEMPLATE_NAME_METADATA};
use crate::core::value::Value;

pub const TOSCA_DEFINITIONS_VERSION: &str = "tosca_simple_yaml_1_0_0";
pub const UNBOUNDED: &str = "UNBOUNDED";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node template {node} not found in {template}")]
    NodeTemplateNotFound { template: String, node: String },

    #[error("node type {0} not found")]
    NodeTypeNotFound(String),

    #[error("output parameter {output} not found in {template}")]
    OutputParameterNotFound { template: String, output: String },

    #[error("template {0} has no substitution mappings")]
    MissingSubstitutionMapping(String),

    #[error("composition data carries no compute")]
    MissingCompute,

    #[error("no nested template supplied for {0}")]
    MissingNestedTemplate(String),

    #[error("{node} is already mapped to {old}, refusing to remap it to {new}")]
    MappingAlreadyExists { node: String, old: String, new: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("report encoding failed: {0}")]
    Report(String),
}

pub type RequirementEntry = BTreeMap<String, RequirementAssignment>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tosca_definitions_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_types: BTreeMap<String, NodeType>,
    #[serde(default, skip_serializing_if = "TopologyTemplate::is_empty")]
    pub topology_template: TopologyTemplate,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopologyTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, ParameterDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_templates: BTreeMap<String, NodeTemplate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationship_templates: BTreeMap<String, RelationshipTemplate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, GroupDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ParameterDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitution_mappings: Option<SubstitutionMapping>,
}

impl TopologyTemplate {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
            && self.node_templates.is_empty()
            && self.relationship_templates.is_empty()
            && self.groups.is_empty()
            && self.outputs.is_empty()
            && self.substitution_mappings.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeTemplate {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    /// `None` and `Some(vec![])` are not the same thing downstream; removal
    /// helpers collapse an emptied list back to `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<RequirementEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequirementAssignment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub capability: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<BTreeMap<String, RequirementDefinition>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, CapabilityDefinition>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_schema: Option<EntrySchema>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttributeDefinition {
    #[serde(rename = "type")]
    pub attribute_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_schema: Option<EntrySchema>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequirementDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    /// `[min, max]`, max may be `UNBOUNDED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<Vec<Value>>,
}

impl RequirementDefinition {
    /// Upper bound on assignments, `None` when unbounded. TOSCA defaults to 1.
    pub fn max_occurrences(&self) -> Option<i64> {
        match self.occurrences.as_ref().and_then(|o| o.get(1)) {
            None => Some(1),
            Some(Value::Int(max)) => Some(*max),
            Some(Value::String(s)) if s == UNBOUNDED => None,
            Some(_) => Some(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    #[serde(rename = "type")]
    pub capability_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_schema: Option<EntrySchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ParameterDefinition {
    pub fn is_type(&self, type_name: &str) -> bool {
        self.parameter_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(type_name))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater_or_equal: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less_or_equal: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntrySchema {
    #[serde(rename = "type")]
    pub entry_type: String,
}

impl EntrySchema {
    pub fn of(entry_type: impl Into<String>) -> Self {
        EntrySchema { entry_type: entry_type.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupDefinition {
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl GroupDefinition {
    /// Swaps `old` for `new` in the member list. `new` is never listed twice.
    pub fn replace_member(&mut self, old: &str, new: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != old);
        if self.members.len() == before {
            return false;
        }
        if !self.members.iter().any(|m| m == new) {
            self.members.push(new.to_string());
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipTemplate {
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubstitutionMapping {
    pub node_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requirements: BTreeMap<String, Vec<String>>,
}

impl ServiceTemplate {
    /// Empty template carrying only its name.
    pub fn new(template_name: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(TEMPLATE_NAME_METADATA.to_string(), template_name.to_string());
        ServiceTemplate {
            tosca_definitions_version: Some(TOSCA_DEFINITIONS_VERSION.to_string()),
            metadata,
            ..Default::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, GraphError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, GraphError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn name(&self) -> &str {
        self.metadata
            .get(TEMPLATE_NAME_METADATA)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Key of this template in every per-file map of the context.
    pub fn file_name(&self) -> String {
        template_file_name(self.name())
    }

    pub fn node_template(&self, id: &str) -> Option<&NodeTemplate> {
        self.topology_template.node_templates.get(id)
    }

    pub fn node_template_mut(&mut self, id: &str) -> Option<&mut NodeTemplate> {
        self.topology_template.node_templates.get_mut(id)
    }

    pub fn expect_node_template_mut(&mut self, id: &str) -> Result<&mut NodeTemplate, GraphError> {
        let template = self.file_name();
        self.topology_template
            .node_templates
            .get_mut(id)
            .ok_or(GraphError::NodeTemplateNotFound { template, node: id.to_string() })
    }

    pub fn add_node_template(&mut self, id: impl Into<String>, node_template: NodeTemplate) {
        self.topology_template.node_templates.insert(id.into(), node_template);
    }

    pub fn remove_node_template(&mut self, id: &str) -> Option<NodeTemplate> {
        self.topology_template.node_templates.remove(id)
    }

    pub fn node_type(&self, id: &str) -> Option<&NodeType> {
        self.node_types.get(id)
    }

    pub fn add_node_type(&mut self, id: impl Into<String>, node_type: NodeType) {
        self.node_types.insert(id.into(), node_type);
    }

    pub fn add_input(&mut self, id: impl Into<String>, parameter: ParameterDefinition) {
        self.topology_template.inputs.insert(id.into(), parameter);
    }

    pub fn add_output(&mut self, id: impl Into<String>, parameter: ParameterDefinition) {
        self.topology_template.outputs.insert(id.into(), parameter);
    }

    pub fn expect_output_mut(&mut self, id: &str) -> Result<&mut ParameterDefinition, GraphError> {
        let template = self.file_name();
        self.topology_template
            .outputs
            .get_mut(id)
            .ok_or(GraphError::OutputParameterNotFound { template, output: id.to_string() })
    }

    /// Node type this template substitutes, if it is a substitution template.
    pub fn substitution_node_type(&self) -> Option<&str> {
        self.topology_template
            .substitution_mappings
            .as_ref()
            .map(|m| m.node_type.as_str())
    }

    /// True when a node template is still typed `node_type`.
    pub fn is_node_type_in_use(&self, node_type: &str) -> bool {
        self.topology_template
            .node_templates
            .values()
            .any(|t| t.node_type == node_type)
    }
}

impl NodeTemplate {
    pub fn new(node_type: impl Into<String>) -> Self {
        NodeTemplate { node_type: node_type.into(), ..Default::default() }
    }

    pub fn requirement_entries(&self) -> impl Iterator<Item = (&String, &RequirementAssignment)> {
        self.requirements.iter().flatten().flat_map(|entry| entry.iter())
    }

    pub fn has_requirement(&self, id: &str, requirement: &RequirementAssignment) -> bool {
        self.requirement_entries()
            .any(|(rid, r)| rid == id && r == requirement)
    }

    pub fn requirement_count(&self, id: &str) -> usize {
        self.requirement_entries().filter(|(rid, _)| *rid == id).count()
    }

    pub fn add_requirement(&mut self, id: impl Into<String>, requirement: RequirementAssignment) {
        let mut entry = RequirementEntry::new();
        entry.insert(id.into(), requirement);
        self.requirements.get_or_insert_with(Vec::new).push(entry);
    }

    /// First assignment equal to `requirement` under `id`.
    pub fn requirement_mut(
        &mut self,
        id: &str,
        requirement: &RequirementAssignment,
    ) -> Option<&mut RequirementAssignment> {
        self.requirements
            .iter_mut()
            .flatten()
            .filter_map(|entry| entry.get_mut(id))
            .find(|r| **r == *requirement)
    }

    /// Removes the first assignment equal to `requirement` under `id`.
    pub fn remove_requirement(&mut self, id: &str, requirement: &RequirementAssignment) -> bool {
        let Some(list) = self.requirements.as_mut() else {
            return false;
        };
        let position = list
            .iter()
            .position(|entry| entry.get(id).is_some_and(|r| r == requirement));
        if let Some(idx) = position {
            list.remove(idx);
        }
        self.collapse_requirements();
        position.is_some()
    }

    fn collapse_requirements(&mut self) {
        if self.requirements.as_ref().is_some_and(Vec::is_empty) {
            self.requirements = None;
        }
    }
}

/// Resolves `type_id` across its `derived_from` chain, nearest definition wins.
///
/// `sources` are searched in order, the first template declaring a type provides it.
/// Ancestors that no source declares (normative root types) end the walk.
pub fn flatten_node_type(
    type_id: &str,
    sources: &[&BTreeMap<String, NodeType>],
) -> Result<NodeType, GraphError> {
    let lookup = |id: &str| sources.iter().find_map(|types| types.get(id));

    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = Some(type_id.to_string());
    while let Some(id) = current {
        if !seen.insert(id.clone()) {
            break;
        }
        match lookup(&id) {
            Some(node_type) => {
                current = node_type.derived_from.clone();
                chain.push(node_type);
            }
            None if chain.is_empty() => return Err(GraphError::NodeTypeNotFound(id)),
            None => break,
        }
    }

    let mut flat = NodeType {
        derived_from: chain.first().and_then(|t| t.derived_from.clone()),
        description: chain.first().and_then(|t| t.description.clone()),
        ..Default::default()
    };
    //root first so children override
    for node_type in chain.into_iter().rev() {
        flat.properties.extend(node_type.properties.clone());
        flat.attributes.extend(node_type.attributes.clone());
        flat.capabilities.extend(node_type.capabilities.clone());
        for entry in &node_type.requirements {
            for (id, def) in entry {
                let existing = flat
                    .requirements
                    .iter_mut()
                    .find_map(|e| e.get_mut(id));
                match existing {
                    Some(slot) => *slot = def.clone(),
                    None => {
                        let mut e = BTreeMap::new();
                        e.insert(id.clone(), def.clone());
                        flat.requirements.push(e);
                    }
                }
            }
        }
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0_0
metadata:
  template_name: Main
node_types:
  org.openecomp.resource.vfc.nodes.heat.vFSB:
    derived_from: org.openecomp.resource.vfc.nodes.heat.nova.Server
topology_template:
  node_templates:
    FSB1:
      type: org.openecomp.resource.vfc.nodes.heat.vFSB
      properties:
        name: {get_input: fsb_name}
      requirements:
        - local_storage:
            capability: tosca.capabilities.Attachment
            node: vol1
            relationship: vol1_attach
        - dependency:
            capability: tosca.capabilities.Node
            node: other
  groups:
    main_group:
      type: org.openecomp.groups.heat.HeatStack
      members: [FSB1, FSB1_port]
"#;

    fn mk_req(node: &str, capability: &str) -> RequirementAssignment {
        RequirementAssignment {
            capability: capability.to_string(),
            node: node.to_string(),
            relationship: None,
        }
    }

    #[test]
    fn parses_template_and_derives_file_name() {
        let st = ServiceTemplate::from_yaml_str(MAIN).unwrap();
        assert_eq!(st.name(), "Main");
        assert_eq!(st.file_name(), "MainServiceTemplate.yaml");

        let fsb = st.node_template("FSB1").unwrap();
        assert_eq!(fsb.requirement_entries().count(), 2);
        assert_eq!(fsb.properties["name"], Value::get_input("fsb_name"));
        assert!(st.is_node_type_in_use("org.openecomp.resource.vfc.nodes.heat.vFSB"));
    }

    #[test]
    fn missing_node_template_names_template_and_node() {
        let mut st = ServiceTemplate::from_yaml_str(MAIN).unwrap();
        match st.expect_node_template_mut("nope").unwrap_err() {
            GraphError::NodeTemplateNotFound { template, node } => {
                assert_eq!(template, "MainServiceTemplate.yaml");
                assert_eq!(node, "nope");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn removing_last_requirement_collapses_to_none() {
        let mut nt = NodeTemplate::new("t");
        let req = mk_req("a", "cap");
        nt.add_requirement("link", req.clone());
        assert!(nt.has_requirement("link", &req));
        assert!(!nt.has_requirement("link", &mk_req("b", "cap")));

        assert!(nt.remove_requirement("link", &req));
        assert_eq!(nt.requirements, None);
        assert!(!nt.remove_requirement("link", &req));
    }

    #[test]
    fn group_member_replaced_once() {
        let mut st = ServiceTemplate::from_yaml_str(MAIN).unwrap();
        let group = st.topology_template.groups.get_mut("main_group").unwrap();

        assert!(group.replace_member("FSB1", "abstract_vFSB"));
        assert!(group.replace_member("FSB1_port", "abstract_vFSB"));
        assert!(!group.replace_member("FSB1", "abstract_vFSB"));
        assert_eq!(group.members, vec!["abstract_vFSB"]);
    }

    #[test]
    fn flatten_merges_chain_with_child_winning() {
        let mut types = BTreeMap::new();
        let mut base = NodeType::default();
        base.properties.insert(
            "name".into(),
            PropertyDefinition { property_type: "string".into(), ..Default::default() },
        );
        base.properties.insert(
            "size".into(),
            PropertyDefinition { property_type: "integer".into(), ..Default::default() },
        );
        base.derived_from = Some("tosca.nodes.Root".into());
        let mut child = NodeType { derived_from: Some("base".into()), ..Default::default() };
        child.properties.insert(
            "size".into(),
            PropertyDefinition { property_type: "float".into(), ..Default::default() },
        );
        types.insert("base".to_string(), base);
        types.insert("child".to_string(), child);

        let flat = flatten_node_type("child", &[&types]).unwrap();
        assert_eq!(flat.properties["name"].property_type, "string");
        assert_eq!(flat.properties["size"].property_type, "float");
        assert_eq!(flat.derived_from.as_deref(), Some("base"));

        assert!(matches!(
            flatten_node_type("ghost", &[&types]),
            Err(GraphError::NodeTypeNotFound(_))
        ));
    }

    #[test]
    fn occurrences_default_to_one() {
        let def = RequirementDefinition::default();
        assert_eq!(def.max_occurrences(), Some(1));

        let unbounded = RequirementDefinition {
            occurrences: Some(vec![Value::Int(0), Value::string(UNBOUNDED)]),
            ..Default::default()
        };
        assert_eq!(unbounded.max_occurrences(), None);
    }

    #[test]
    fn yaml_round_trip_keeps_functions() {
        let st = ServiceTemplate::from_yaml_str(MAIN).unwrap();
        let text = st.to_yaml_string().unwrap();
        let back = ServiceTemplate::from_yaml_str(&text).unwrap();
        assert_eq!(st, back);
    }
}
