// classification logic: which part each batch node plays, and how each of its
// properties is carried into the substitution template
use std::collections::BTreeMap;

use crate::config::CompositionConfig;
use crate::core::consolidation::UnifiedCompositionData;
use crate::core::context::CompositionContext;
use crate::core::graph::{GraphError, ServiceTemplate};
use crate::core::types::{is_primitive_type, namespace_suffix, EntityKind, JSON_TYPE};
use crate::core::value::Value;

/// One original node of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMember {
    pub kind: EntityKind,
    /// id of its copy inside the substitution template
    pub local_id: String,
    /// port type, or the port id when the compute has several ports of that type
    pub port_key: Option<String>,
}

/// Original ids of a batch resolved to their roles and local ids.
#[derive(Debug, Clone)]
pub struct BatchLayout {
    /// full type of the batch's computes
    pub compute_type: String,
    pub compute_suffix: String,
    members: BTreeMap<String, BatchMember>,
}

impl BatchLayout {
    pub fn new(
        template: &ServiceTemplate,
        ctx: &CompositionContext,
        batch: &[UnifiedCompositionData],
    ) -> Result<Self, GraphError> {
        let first = batch.first().ok_or(GraphError::MissingCompute)?.compute()?;
        let compute_type = ctx
            .node_template_or_cleaned(template, first.entity.node_template_id.as_str())?
            .node_type
            .clone();
        let compute_suffix = namespace_suffix(&compute_type).to_string();

        let mut members = BTreeMap::new();
        for data in batch {
            let compute = data.compute()?;
            let compute_id = compute.entity.node_template_id.as_str();
            let suffix = namespace_suffix(&ctx.node_template_or_cleaned(template, compute_id)?.node_type)
                .to_string();
            for port in &data.ports {
                let port_id = port.entity.node_template_id.as_str();
                //ports at the same slot of the first compute share its local copy
                let port_type = compute.port_type_of(port_id);
                let slot = compute
                    .ports
                    .get(&port_type)
                    .and_then(|ids| ids.iter().position(|p| p == port_id));
                let representative = slot.and_then(|i| first.ports.get(&port_type)?.get(i));
                let (owner, owner_suffix, rep_id) = match representative {
                    Some(rep) => (first, compute_suffix.as_str(), rep.as_str()),
                    None => (compute, suffix.as_str(), port_id),
                };
                members.insert(
                    port_id.to_string(),
                    BatchMember {
                        kind: EntityKind::Port,
                        local_id: owner.local_port_id(owner_suffix, rep_id),
                        port_key: Some(owner.port_key(rep_id)),
                    },
                );
            }
            members.insert(
                compute_id.to_string(),
                BatchMember { kind: EntityKind::Compute, local_id: suffix, port_key: None },
            );
            if let Some(nested) = &data.nested {
                let nested_id = nested.entity.node_template_id.clone();
                members.insert(
                    nested_id.clone(),
                    BatchMember { kind: EntityKind::Nested, local_id: nested_id, port_key: None },
                );
            }
        }
        Ok(BatchLayout { compute_type, compute_suffix, members })
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.contains_key(node_id)
    }

    pub fn member(&self, node_id: &str) -> Option<&BatchMember> {
        self.members.get(node_id)
    }

    pub fn local_id(&self, node_id: &str) -> Option<&str> {
        self.members.get(node_id).map(|m| m.local_id.as_str())
    }

    /// Local id of a batch member, error if the id is not part of the batch.
    pub fn expect_local_id(&self, template: &ServiceTemplate, node_id: &str) -> Result<&str, GraphError> {
        self.local_id(node_id).ok_or_else(|| GraphError::NodeTemplateNotFound {
            template: template.file_name(),
            node: node_id.to_string(),
        })
    }

    pub fn port_key(&self, port_id: &str) -> Option<&str> {
        self.members.get(port_id)?.port_key.as_deref()
    }

    /// Port key a `port_<key>_<prop>` input was generated for. The longest
    /// matching key wins, so `ctrl` never captures `port_ctrl_ext_ip`.
    pub fn port_key_of_input<'a>(&'a self, input_id: &str) -> Option<&'a str> {
        let rest = input_id.strip_prefix("port_")?;
        self.members
            .values()
            .filter_map(|m| m.port_key.as_deref())
            .filter(|key| rest.strip_prefix(key).is_some_and(|tail| tail.starts_with('_')))
            .max_by_key(|key| key.len())
    }

    /// Name of the list input feeding `property` of a batch member:
    /// `compute_<suffix>_<prop>`, `port_<portType|portId>_<prop>`.
    pub fn parameter_id(&self, node_id: &str, property: &str) -> Option<String> {
        let member = self.members.get(node_id)?;
        match member.kind {
            EntityKind::Compute => Some(format!("compute_{}_{property}", member.local_id)),
            EntityKind::Port => Some(format!("port_{}_{property}", member.port_key.as_deref()?)),
            EntityKind::Nested => None,
        }
    }
}

/// How a property of a batch member is carried into its local copy.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyClass {
    /// same for every instance, fed by one scalar input
    IdenticalValue,
    /// reads attributes of batch peers only, resolved to their local copies
    LocalGetAttr(Value),
    /// mixes batch peers with outside nodes or inputs, copied verbatim
    Unsupported,
    /// per-instance value, fed by a list input
    Parameterized,
}

pub fn classify_property(
    name: &str,
    value: &Value,
    layout: &BatchLayout,
    config: &CompositionConfig,
) -> PropertyClass {
    if config.is_identical_value_property(name) {
        return PropertyClass::IdenticalValue;
    }

    let get_attrs = value.get_attributes();
    let from_batch = get_attrs.iter().any(|ga| layout.contains(&ga.node));
    let from_outside = get_attrs.iter().any(|ga| !layout.contains(&ga.node));

    if from_batch && (from_outside || value.contains_get_input()) {
        return PropertyClass::Unsupported;
    }
    if from_batch {
        let mut local = value.clone();
        local.for_each_get_attribute_mut(&mut |ga| {
            if let Some(local_id) = layout.local_id(&ga.node) {
                ga.node = local_id.to_string();
            }
        });
        return PropertyClass::LocalGetAttr(local);
    }
    PropertyClass::Parameterized
}

/// Entry schema of the list input for a property of declared type `property_type`.
pub fn list_entry_type(property_type: Option<&str>) -> String {
    match property_type {
        Some(t) if is_primitive_type(t) => t.to_ascii_lowercase(),
        _ => JSON_TYPE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consolidation::{
        ComputeTemplateConsolidationData, ConsolidationData, PortTemplateConsolidationData,
    };
    use crate::core::graph::NodeTemplate;
    use serde_json::json;

    const FSB_TYPE: &str = "org.openecomp.resource.vfc.nodes.heat.vFSB";

    fn mk_entry(compute: &str, ports: &[(&str, &str)]) -> UnifiedCompositionData {
        let mut c = ComputeTemplateConsolidationData::new(compute);
        for (port_type, port_id) in ports {
            c.ports.entry(port_type.to_string()).or_default().push(port_id.to_string());
        }
        let mut data = UnifiedCompositionData::with_compute(c);
        for (_, port_id) in ports {
            data.ports.push(PortTemplateConsolidationData::new(*port_id));
        }
        data
    }

    fn mk_layout(batch: &[UnifiedCompositionData]) -> BatchLayout {
        let mut st = ServiceTemplate::new("Main");
        for data in batch {
            st.add_node_template(data.compute().unwrap().entity.node_template_id.clone(), NodeTemplate::new(FSB_TYPE));
        }
        let ctx = CompositionContext::new(CompositionConfig::default(), ConsolidationData::default());
        BatchLayout::new(&st, &ctx, batch).unwrap()
    }

    #[test]
    fn layout_names_local_copies() {
        let layout = mk_layout(&[
            mk_entry("FSB1", &[("ctrl", "FSB1_ctrl")]),
            mk_entry("FSB2", &[("mgmt", "FSB2_mgmt_0"), ("mgmt", "FSB2_mgmt_1")]),
        ]);

        assert_eq!(layout.compute_suffix, "vFSB");
        assert_eq!(layout.local_id("FSB1"), Some("vFSB"));
        assert_eq!(layout.local_id("FSB1_ctrl"), Some("vFSB_ctrl"));
        //two ports of one type -> the port id disambiguates
        assert_eq!(layout.local_id("FSB2_mgmt_1"), Some("vFSB_FSB2_mgmt_1"));

        assert_eq!(layout.parameter_id("FSB1", "name").as_deref(), Some("compute_vFSB_name"));
        assert_eq!(layout.parameter_id("FSB1_ctrl", "ip").as_deref(), Some("port_ctrl_ip"));
        assert_eq!(
            layout.parameter_id("FSB2_mgmt_0", "ip").as_deref(),
            Some("port_FSB2_mgmt_0_ip")
        );
        assert_eq!(layout.parameter_id("outsider", "ip"), None);
    }

    #[test]
    fn ports_share_the_first_computes_copy() {
        let layout = mk_layout(&[
            mk_entry("FSB1", &[("mgmt", "FSB1_m0"), ("mgmt", "FSB1_m1"), ("ctrl", "FSB1_ctrl")]),
            mk_entry("FSB2", &[("mgmt", "FSB2_m0"), ("mgmt", "FSB2_m1"), ("ctrl", "FSB2_ctrl")]),
        ]);

        assert_eq!(layout.local_id("FSB2_m1"), Some("vFSB_FSB1_m1"));
        assert_eq!(layout.port_key("FSB2_m1"), Some("FSB1_m1"));
        assert_eq!(layout.local_id("FSB2_ctrl"), Some("vFSB_ctrl"));
        assert_eq!(layout.parameter_id("FSB2_ctrl", "ip").as_deref(), Some("port_ctrl_ip"));
        assert_eq!(layout.parameter_id("FSB1_m0", "ip"), layout.parameter_id("FSB2_m0", "ip"));
    }

    #[test]
    fn port_input_resolves_to_longest_key() {
        let layout = mk_layout(&[mk_entry("FSB1", &[("ctrl", "FSB1_ctrl"), ("ctrl_ext", "FSB1_ext")])]);
        assert_eq!(layout.port_key_of_input("port_ctrl_ext_ip"), Some("ctrl_ext"));
        assert_eq!(layout.port_key_of_input("port_ctrl_ip"), Some("ctrl"));
        assert_eq!(layout.port_key_of_input("port_mgmt_ip"), None);
        assert_eq!(layout.port_key_of_input("compute_vFSB_ip"), None);
    }

    #[test]
    fn layout_needs_a_compute() {
        let st = ServiceTemplate::new("Main");
        let ctx = CompositionContext::new(CompositionConfig::default(), ConsolidationData::default());
        assert!(matches!(BatchLayout::new(&st, &ctx, &[]), Err(GraphError::MissingCompute)));
    }

    #[test]
    fn classifies_properties() {
        let layout = mk_layout(&[mk_entry("FSB1", &[("ctrl", "FSB1_ctrl")])]);
        let config = CompositionConfig::default();

        let image = Value::string("fsb.qcow2");
        assert_eq!(classify_property("image", &image, &layout, &config), PropertyClass::IdenticalValue);

        let plain = Value::string("fsb-1");
        assert_eq!(classify_property("name", &plain, &layout, &config), PropertyClass::Parameterized);

        let outside = Value::from(json!({"get_attribute": ["other", "ip"]}));
        assert_eq!(classify_property("addr", &outside, &layout, &config), PropertyClass::Parameterized);

        let peer = Value::from(json!([{"get_attribute": ["FSB1_ctrl", "ip"]}]));
        assert_eq!(
            classify_property("addr", &peer, &layout, &config),
            PropertyClass::LocalGetAttr(Value::from(json!([{"get_attribute": ["vFSB_ctrl", "ip"]}])))
        );
    }

    #[test]
    fn mixed_get_attr_properties_are_left_alone() {
        let layout = mk_layout(&[mk_entry("FSB1", &[("ctrl", "FSB1_ctrl")])]);
        let config = CompositionConfig::default();

        let mixed = Value::from(json!([
            {"get_attribute": ["FSB1_ctrl", "ip"]},
            {"get_attribute": ["other", "ip"]}
        ]));
        assert_eq!(classify_property("addr", &mixed, &layout, &config), PropertyClass::Unsupported);

        let with_input = Value::from(json!({
            "a": {"get_attribute": ["FSB1", "ip"]},
            "b": {"get_input": "net"}
        }));
        assert_eq!(classify_property("addr", &with_input, &layout, &config), PropertyClass::Unsupported);
    }

    #[test]
    fn list_entry_type_keeps_primitives_only() {
        assert_eq!(list_entry_type(Some("String")), "string");
        assert_eq!(list_entry_type(Some("integer")), "integer");
        assert_eq!(list_entry_type(Some("map")), "json");
        assert_eq!(list_entry_type(None), "json");
    }
}
