use tracing::debug;

use crate::core::classify::BatchLayout;
use crate::core::consolidation::{ConsolidationEntity, EntityConsolidationData, UnifiedCompositionData};
use crate::core::context::CompositionContext;
use crate::core::graph::{GraphError, ServiceTemplate};
use crate::core::types::{namespace_suffix, substitution_output_parameter_id, EntityKind};
use crate::core::value::{GetAttribute, Value};

/// Where get_attribute expressions aimed at a rewritten node end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetAttrTarget<'a> {
    /// The abstract node. The attribute becomes the substitution output
    /// `<localId>_<attr>` exposing it.
    Abstract { abstract_id: &'a str, local_id: &'a str },
    /// The unified nested node. The attribute is kept.
    Nested { node_id: &'a str },
}

impl GetAttrTarget<'_> {
    fn apply(&self, ga: &mut GetAttribute) {
        match self {
            GetAttrTarget::Abstract { abstract_id, local_id } => {
                ga.attribute = substitution_output_parameter_id(local_id, &ga.attribute);
                ga.node = abstract_id.to_string();
            }
            GetAttrTarget::Nested { node_id } => ga.node = node_id.to_string(),
        }
    }
}

/// Rewrites every get_attribute in `value` that reads `attribute` of `old_node`.
/// Expressions reading anything else are left as they are. Returns the number
/// of rewritten expressions.
pub fn rewrite_get_attr(value: &mut Value, old_node: &str, attribute: &str, target: GetAttrTarget<'_>) -> usize {
    let mut rewritten = 0;
    value.for_each_get_attribute_mut(&mut |ga| {
        if ga.node == old_node && ga.attribute == attribute {
            target.apply(ga);
            rewritten += 1;
        }
    });
    rewritten
}

/// Redirects the output parameters reading attributes of `entity`.
pub fn update_output_get_attr_in(
    template: &mut ServiceTemplate,
    entity: &EntityConsolidationData,
    target: GetAttrTarget<'_>,
) -> Result<(), GraphError> {
    for func in &entity.output_parameters_get_attr_in {
        let output = template.expect_output_mut(&func.field_name)?;
        if let Some(value) = output.value.as_mut() {
            rewrite_get_attr(value, &entity.node_template_id, &func.attribute_name, target);
        }
    }
    Ok(())
}

/// Redirects node properties reading attributes of `entity`.
///
/// Sources inside `skip` are left alone: their copies in the substitution
/// template already read the local nodes. A source that was itself cleaned by
/// an earlier batch is handled by [`update_unified_abstract_nodes_connectivity`].
pub fn update_nodes_get_attr_in(
    template: &mut ServiceTemplate,
    entity: &EntityConsolidationData,
    target: GetAttrTarget<'_>,
    skip: Option<&BatchLayout>,
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    for (source_id, funcs) in &entity.nodes_get_attr_in {
        if skip.is_some_and(|layout| layout.contains(source_id)) {
            continue;
        }
        let Some(source) = template.node_template_mut(source_id) else {
            if ctx.cleaned_node(&file_name, source_id).is_some() {
                debug!(source = %source_id, target = %entity.node_template_id, "get_attr source already cleaned");
                continue;
            }
            return Err(GraphError::NodeTemplateNotFound { template: file_name, node: source_id.clone() });
        };
        for func in funcs {
            match source.properties.get_mut(&func.field_name) {
                Some(value) => {
                    rewrite_get_attr(value, &entity.node_template_id, &func.attribute_name, target);
                }
                None => {
                    debug!(source = %source_id, property = %func.field_name, "get_attr property no longer present")
                }
            }
        }
    }
    Ok(())
}

/// get_attr connectivity of a consolidated batch: outputs, then node properties.
pub fn update_get_attr_connectivity(
    template: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    let entities: Vec<&dyn ConsolidationEntity> = batch.iter().flat_map(|d| d.flat_entities()).collect();

    for pass in [GetAttrPass::Outputs, GetAttrPass::Nodes] {
        for entity in &entities {
            let id = entity.node_template_id();
            let Some(abstract_id) = ctx.abstract_node_id(&file_name, id) else {
                debug!(node = id, "no abstract node recorded, get_attr left as is");
                continue;
            };
            let local_id = layout.expect_local_id(template, id)?;
            let target = GetAttrTarget::Abstract { abstract_id, local_id };
            match pass {
                GetAttrPass::Outputs => update_output_get_attr_in(template, entity.entity(), target)?,
                GetAttrPass::Nodes => {
                    update_nodes_get_attr_in(template, entity.entity(), target, Some(layout), ctx)?
                }
            }
        }
    }
    Ok(())
}

/// get_attr connectivity of unified nested nodes: node properties, then outputs.
/// Only the node id changes.
pub fn update_nested_get_attr_connectivity(
    template: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    for nested in batch.iter().filter_map(|d| d.nested.as_ref()) {
        let Some(node_id) = ctx.nested_node_id(&file_name, nested.node_template_id()) else {
            continue;
        };
        let target = GetAttrTarget::Nested { node_id };
        update_nodes_get_attr_in(template, nested.entity(), target, None, ctx)?;
        update_output_get_attr_in(template, nested.entity(), target)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum GetAttrPass {
    Outputs,
    Nodes,
}

/// Id a cleaned node got inside its substitution template.
///
/// The id recorded while building the substitution template wins. Otherwise
/// ports resolve through the compute that owns them, computes through the
/// suffix of their own type.
pub fn cleaned_node_local_id(ctx: &CompositionContext, file_name: &str, original: &str) -> Option<String> {
    if let Some(local_id) = ctx.absorbed_local_id(file_name, original) {
        return Some(local_id.to_string());
    }
    match ctx.cleaned_kind(file_name, original)? {
        EntityKind::Port => {
            let (compute_type, compute) = ctx
                .consolidation_data
                .file(file_name)?
                .compute_owning_port(original)?;
            Some(compute.local_port_id(namespace_suffix(compute_type), original))
        }
        EntityKind::Compute => {
            let node = ctx.cleaned_node(file_name, original)?;
            Some(namespace_suffix(&node.node_type).to_string())
        }
        EntityKind::Nested => None,
    }
}

/// Cross-batch pass, run once after every batch of a template is composed.
///
/// Abstract and unified nested nodes copied their properties from the original
/// nodes, so their get_attribute expressions may still read nodes that a later
/// batch consolidated. Each such expression is pointed at the unified nested
/// node, or at the abstract node and its `<localId>_<attr>` output.
pub fn update_unified_abstract_nodes_connectivity(
    template: &mut ServiceTemplate,
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    let mut node_ids = ctx.abstract_node_ids(&file_name);
    node_ids.extend(ctx.nested_node_ids(&file_name));

    for node_id in &node_ids {
        let Some(node) = template.node_template_mut(node_id) else {
            continue;
        };
        for value in node.properties.values_mut() {
            value.for_each_get_attribute_mut(&mut |ga| {
                if let Some(nested_id) = ctx.nested_node_id(&file_name, &ga.node) {
                    ga.node = nested_id.to_string();
                    return;
                }
                let Some(abstract_id) = ctx.abstract_node_id(&file_name, &ga.node) else {
                    return;
                };
                match cleaned_node_local_id(ctx, &file_name, &ga.node) {
                    Some(local_id) => GetAttrTarget::Abstract { abstract_id, local_id: &local_id }.apply(ga),
                    None => debug!(node = %ga.node, "consolidated node has no local id, get_attr left as is"),
                }
            });
        }
    }
    Ok(())
}

/*
What do these unit tests check:

    1. rewrite_get_attr only touches expressions matching (node, attribute).

    2. Output parameters and node properties reading a consolidated compute get
       pointed at the abstract node with the `<localId>_<attr>` attribute, while
       sources inside the batch stay untouched.

    3. The cross-batch pass resolves expressions on abstract nodes using the
       cleaned cache (compute by type suffix, port via its owning compute).
*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositionConfig;
    use crate::core::consolidation::{
        ComputeTemplateConsolidationData, ConsolidationData, GetAttrFuncData, PortTemplateConsolidationData,
    };
    use crate::core::graph::{NodeTemplate, ParameterDefinition};
    use serde_json::json;

    const FSB_TYPE: &str = "org.openecomp.resource.vfc.nodes.heat.vFSB";

    fn mk_ctx() -> CompositionContext {
        CompositionContext::new(CompositionConfig::default(), ConsolidationData::default())
    }

    fn mk_node(node_type: &str, props: serde_json::Value) -> NodeTemplate {
        let mut node = NodeTemplate::new(node_type);
        if let serde_json::Value::Object(map) = props {
            for (k, v) in map {
                node.properties.insert(k, Value::from(v));
            }
        }
        node
    }

    #[test]
    fn rewrite_get_attr_touches_matching_expressions_only() {
        let mut value = Value::from(json!([
            {"get_attribute": ["FSB1", "ip"]},
            {"get_attribute": ["FSB1", "name"]},
            {"get_attribute": ["other", "ip"]}
        ]));

        let n = rewrite_get_attr(
            &mut value,
            "FSB1",
            "ip",
            GetAttrTarget::Abstract { abstract_id: "abstract_vFSB", local_id: "vFSB" },
        );

        assert_eq!(n, 1);
        assert_eq!(
            value,
            Value::from(json!([
                {"get_attribute": ["abstract_vFSB", "vFSB_ip"]},
                {"get_attribute": ["FSB1", "name"]},
                {"get_attribute": ["other", "ip"]}
            ]))
        );

        let n = rewrite_get_attr(&mut value, "other", "ip", GetAttrTarget::Nested { node_id: "abstract_pcm_0" });
        assert_eq!(n, 1);
        assert_eq!(value.get_attributes()[2].node, "abstract_pcm_0");
        assert_eq!(value.get_attributes()[2].attribute, "ip");
    }

    #[test]
    fn batch_get_attr_points_at_abstract_node() {
        let mut st = ServiceTemplate::new("Main");
        st.add_node_template("FSB1", NodeTemplate::new(FSB_TYPE));
        st.add_node_template("FSB1_ctrl", mk_node("port", json!({"fixed": {"get_attribute": ["FSB1", "ip"]}})));
        st.add_node_template("lb", mk_node("lb", json!({"backend": {"get_attribute": ["FSB1", "ip"]}})));
        st.add_output(
            "fsb_ip",
            ParameterDefinition { value: Some(Value::get_attribute("FSB1", "ip")), ..Default::default() },
        );

        let mut compute = ComputeTemplateConsolidationData::new("FSB1");
        compute.ports.insert("ctrl".into(), vec!["FSB1_ctrl".into()]);
        compute.entity.nodes_get_attr_in.insert("lb".into(), vec![GetAttrFuncData::new("backend", "ip")]);
        compute.entity.nodes_get_attr_in.insert("FSB1_ctrl".into(), vec![GetAttrFuncData::new("fixed", "ip")]);
        compute.entity.output_parameters_get_attr_in.push(GetAttrFuncData::new("fsb_ip", "ip"));
        let mut data = UnifiedCompositionData::with_compute(compute);
        data.ports.push(PortTemplateConsolidationData::new("FSB1_ctrl"));
        let batch = vec![data];

        let mut ctx = mk_ctx();
        ctx.set_abstract_mapping(&st.file_name(), "FSB1", "abstract_vFSB").unwrap();
        ctx.set_abstract_mapping(&st.file_name(), "FSB1_ctrl", "abstract_vFSB").unwrap();
        let layout = BatchLayout::new(&st, &ctx, &batch).unwrap();

        update_get_attr_connectivity(&mut st, &batch, &layout, &ctx).unwrap();

        let expected = Value::get_attribute("abstract_vFSB", "vFSB_ip");
        assert_eq!(st.node_template("lb").unwrap().properties["backend"], expected);
        assert_eq!(st.topology_template.outputs["fsb_ip"].value.as_ref(), Some(&expected));
        //in-batch source untouched
        assert_eq!(
            st.node_template("FSB1_ctrl").unwrap().properties["fixed"],
            Value::get_attribute("FSB1", "ip")
        );
    }

    #[test]
    fn missing_output_is_an_error() {
        let mut st = ServiceTemplate::new("Main");
        let mut entity = EntityConsolidationData::new("FSB1");
        entity.output_parameters_get_attr_in.push(GetAttrFuncData::new("ghost", "ip"));

        let err = update_output_get_attr_in(&mut st, &entity, GetAttrTarget::Nested { node_id: "x" }).unwrap_err();
        match err {
            GraphError::OutputParameterNotFound { output, .. } => assert_eq!(output, "ghost"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn cross_batch_pass_uses_cleaned_cache() {
        let mut st = ServiceTemplate::new("Main");
        let file = st.file_name();
        st.add_node_template(
            "abstract_vLB",
            mk_node(
                "abstract.vLB",
                json!({"compute_vLB_peer": [
                    {"get_attribute": ["FSB1", "ip"]},
                    {"get_attribute": ["FSB1_ctrl", "mac"]},
                    {"get_attribute": ["pcm", "ip"]},
                    {"get_attribute": ["plain", "ip"]}
                ]}),
            ),
        );

        let mut compute = ComputeTemplateConsolidationData::new("FSB1");
        compute.ports.insert("ctrl".into(), vec!["FSB1_ctrl".into()]);
        let mut data = ConsolidationData::default();
        data.add_compute(&file, FSB_TYPE, compute);

        let mut ctx = CompositionContext::new(CompositionConfig::default(), data);
        ctx.set_abstract_mapping(&file, "LB1", "abstract_vLB").unwrap();
        ctx.set_abstract_mapping(&file, "FSB1", "abstract_vFSB").unwrap();
        ctx.set_abstract_mapping(&file, "FSB1_ctrl", "abstract_vFSB").unwrap();
        ctx.set_nested_node_mapping(&file, "pcm", "abstract_pcm_0").unwrap();
        ctx.cache_cleaned_node(&file, "FSB1", EntityKind::Compute, NodeTemplate::new(FSB_TYPE));
        ctx.cache_cleaned_node(&file, "FSB1_ctrl", EntityKind::Port, NodeTemplate::new("port"));

        update_unified_abstract_nodes_connectivity(&mut st, &ctx).unwrap();

        let attrs: Vec<(String, String)> = st.node_template("abstract_vLB").unwrap().properties["compute_vLB_peer"]
            .get_attributes()
            .into_iter()
            .map(|ga| (ga.node.clone(), ga.attribute.clone()))
            .collect();
        assert_eq!(
            attrs,
            vec![
                ("abstract_vFSB".to_string(), "vFSB_ip".to_string()),
                ("abstract_vFSB".to_string(), "vFSB_ctrl_mac".to_string()),
                ("abstract_pcm_0".to_string(), "ip".to_string()),
                ("plain".to_string(), "ip".to_string()),
            ]
        );

        //second run changes nothing
        let before = st.clone();
        update_unified_abstract_nodes_connectivity(&mut st, &ctx).unwrap();
        assert_eq!(before, st);
    }
}
