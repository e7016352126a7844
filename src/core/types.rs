// shared constants + naming helpers
//
// Every id/type string built here is a naming contract: later passes parse these
// ids back into their parts, so separators and prefixes must not drift.
use std::fmt;

use serde::{Deserialize, Serialize};

pub type NodeTemplateId = String;

pub const ABSTRACT_NODE_TEMPLATE_ID_PREFIX: &str = "abstract_";
pub const ABSTRACT_NODE_TYPE_PREFIX: &str = "org.openecomp.resource.abstract.nodes.";
pub const VFC_ABSTRACT_SUBSTITUTE: &str = "org.openecomp.resource.abstract.nodes.VFC";
pub const NESTED_NODE_TYPE_NAMESPACE: &str = "heat.";
pub const NESTED_TEMPLATE_PREFIX: &str = "Nested_";

pub const TEMPLATE_NAME_METADATA: &str = "template_name";
pub const SERVICE_TEMPLATE_FILE_SUFFIX: &str = "ServiceTemplate.yaml";
pub const GLOBAL_SUBSTITUTION_TYPES_TEMPLATE_NAME: &str = "GlobalSubstitutionTypes";

pub const DIRECTIVE_SUBSTITUTABLE: &str = "substitutable";
pub const SERVICE_TEMPLATE_FILTER_PROPERTY_NAME: &str = "service_template_filter";
pub const SUBSTITUTE_SERVICE_TEMPLATE_PROPERTY_NAME: &str = "substitute_service_template";
pub const COUNT_PROPERTY_NAME: &str = "count";
pub const INDEX_VALUE_PROPERTY_NAME: &str = "index_value";
pub const MODELABLE_ENTITY_NAME_SELF: &str = "SELF";

pub const HEAT_STACK_GROUP_TYPE: &str = "org.openecomp.groups.heat.HeatStack";
pub const VOLUME_ATTACHES_TO_RELATIONSHIP_TYPE: &str = "org.openecomp.relationships.VolumeAttachesTo";
pub const INSTANCE_UUID_PROPERTY_NAME: &str = "instance_uuid";

pub const IDENTICAL_VALUE_PROPERTY_PREFIX: &str = "vm_";
pub const IDENTICAL_VALUE_PROPERTY_SUFFIX: &str = "_name";

pub const STRING_TYPE: &str = "string";
pub const INTEGER_TYPE: &str = "integer";
pub const FLOAT_TYPE: &str = "float";
pub const BOOLEAN_TYPE: &str = "boolean";
pub const LIST_TYPE: &str = "list";
pub const JSON_TYPE: &str = "json";

const PRIMITIVE_TYPES: [&str; 4] = [STRING_TYPE, INTEGER_TYPE, FLOAT_TYPE, BOOLEAN_TYPE];

/// Which part of a consolidatable unit a node template plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Compute,
    Port,
    Nested,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Compute => "compute",
            EntityKind::Port => "port",
            EntityKind::Nested => "nested",
        }
    }

    /// Kind encoded in a substitution input name (`compute_..`, `port_..`).
    pub fn from_input_name(input_name: &str) -> Option<EntityKind> {
        let (prefix, _) = input_name.split_once('_')?;
        match prefix {
            "compute" => Some(EntityKind::Compute),
            "port" => Some(EntityKind::Port),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `abc.def.vFSB` -> `vFSB`
pub fn namespace_suffix(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

pub fn is_primitive_type(type_name: &str) -> bool {
    PRIMITIVE_TYPES.iter().any(|p| p.eq_ignore_ascii_case(type_name))
}

/// Appends `_<index>` when an index is present.
pub fn with_index(base: String, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{base}_{i}"),
        None => base,
    }
}

pub fn template_file_name(template_name: &str) -> String {
    format!("{template_name}{SERVICE_TEMPLATE_FILE_SUFFIX}")
}

pub fn substitution_template_name(compute_suffix: &str, index: Option<usize>) -> String {
    with_index(format!("{NESTED_TEMPLATE_PREFIX}{compute_suffix}"), index)
}

pub fn abstract_node_template_id(compute_suffix: &str, index: Option<usize>) -> String {
    with_index(format!("{ABSTRACT_NODE_TEMPLATE_ID_PREFIX}{compute_suffix}"), index)
}

pub fn substitution_node_type_id(compute_suffix: &str, index: Option<usize>) -> String {
    with_index(format!("{ABSTRACT_NODE_TYPE_PREFIX}{compute_suffix}"), index)
}

pub fn nested_node_type_id(compute_suffix: &str) -> String {
    format!("{ABSTRACT_NODE_TYPE_PREFIX}{NESTED_NODE_TYPE_NAMESPACE}{compute_suffix}")
}

/// Name of the substitution output exposing `attribute` of a local node.
pub fn substitution_output_parameter_id(local_node_id: &str, attribute: &str) -> String {
    format!("{local_node_id}_{attribute}")
}

pub fn identical_value_input_id(property_name: &str) -> String {
    format!("{IDENTICAL_VALUE_PROPERTY_PREFIX}{property_name}{IDENTICAL_VALUE_PROPERTY_SUFFIX}")
}

/// Inverse of [`identical_value_input_id`]: `vm_image_name` -> `image`.
pub fn identical_value_property_name(input_name: &str) -> Option<&str> {
    let inner = input_name
        .strip_prefix(IDENTICAL_VALUE_PROPERTY_PREFIX)?
        .strip_suffix(IDENTICAL_VALUE_PROPERTY_SUFFIX)?;
    if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_lowercase()) {
        Some(inner)
    } else {
        None
    }
}

/// Port type guessed from a port node id by dropping numeric segments
/// (`vFSB_1_ctrl_port` -> `vFSB_ctrl_port`). Only used when the owning compute
/// does not list the port.
pub fn port_type_from_id(port_node_id: &str) -> String {
    port_node_id
        .split('_')
        .filter(|token| !token.is_empty() && !token.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_suffix_takes_last_segment() {
        assert_eq!(namespace_suffix("org.openecomp.resource.vfc.nodes.heat.vFSB"), "vFSB");
        assert_eq!(namespace_suffix("plain"), "plain");
    }

    #[test]
    fn indexed_names_only_carry_index_when_present() {
        assert_eq!(substitution_template_name("vFSB", None), "Nested_vFSB");
        assert_eq!(substitution_template_name("vFSB", Some(1)), "Nested_vFSB_1");
        assert_eq!(abstract_node_template_id("vFSB", Some(0)), "abstract_vFSB_0");
        assert_eq!(
            substitution_node_type_id("vFSB", None),
            "org.openecomp.resource.abstract.nodes.vFSB"
        );
        assert_eq!(
            nested_node_type_id("pcm"),
            "org.openecomp.resource.abstract.nodes.heat.pcm"
        );
    }

    #[test]
    fn identical_value_names_round_trip() {
        let input = identical_value_input_id("image");
        assert_eq!(input, "vm_image_name");
        assert_eq!(identical_value_property_name(&input), Some("image"));
        assert_eq!(identical_value_property_name("vm_Image_name"), None);
        assert_eq!(identical_value_property_name("compute_vFSB_name"), None);
    }

    #[test]
    fn input_names_encode_entity_kind() {
        assert_eq!(EntityKind::from_input_name("compute_vFSB_name"), Some(EntityKind::Compute));
        assert_eq!(EntityKind::from_input_name("port_ctrl_ip"), Some(EntityKind::Port));
        assert_eq!(EntityKind::from_input_name("index_value"), None);
        assert_eq!(EntityKind::from_input_name("vm_image_name"), None);
    }

    #[test]
    fn port_type_drops_numeric_segments() {
        assert_eq!(port_type_from_id("vFSB_1_ctrl_port"), "vFSB_ctrl_port");
        assert_eq!(port_type_from_id("ctrl"), "ctrl");
    }
}
