// substitution template builder
use std::collections::BTreeMap;

use tracing::debug;

use crate::core::classify::{classify_property, list_entry_type, BatchLayout, PropertyClass};
use crate::core::connectivity::{localize_requirements, strip_outgoing_requirements};
use crate::core::consolidation::{ConsolidationEntity, PortTemplateConsolidationData, UnifiedCompositionData};
use crate::core::context::CompositionContext;
use crate::core::graph::{
    AttributeDefinition, Constraint, EntrySchema, GraphError, NodeTemplate, NodeType, ParameterDefinition,
    PropertyDefinition, ServiceTemplate, SubstitutionMapping,
};
use crate::core::types::{
    identical_value_input_id, substitution_node_type_id, substitution_output_parameter_id,
    substitution_template_name, INDEX_VALUE_PROPERTY_NAME, INTEGER_TYPE, LIST_TYPE, STRING_TYPE,
    VFC_ABSTRACT_SUBSTITUTE,
};
use crate::core::value::Value;

const INDEX_VALUE_DESCRIPTION: &str = "Index value of this substitution service template runtime instance";

/// Builds the substitution template standing for every instance of `batch`.
///
/// Steps:
/// 1) index input
/// 2) compute copy (first instance), properties parameterized over all instances
/// 3) one port copy per local port id
/// 4) outputs for every attribute read from outside the batch
/// 5) substitution node type, registered globally, and the substitution mappings
///
/// Returns `None` for an empty batch.
pub fn create_substitution_template(
    template: &ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    index: Option<usize>,
    ctx: &mut CompositionContext,
) -> Result<Option<ServiceTemplate>, GraphError> {
    if batch.is_empty() {
        return Ok(None);
    }
    let mut substitution = ServiceTemplate::new(&substitution_template_name(&layout.compute_suffix, index));
    substitution.add_input(INDEX_VALUE_PROPERTY_NAME, index_input());

    add_compute(template, &mut substitution, batch, layout, ctx)?;
    add_ports(template, &mut substitution, batch, layout, ctx)?;
    add_outputs(template, &mut substitution, batch, layout)?;

    let node_type_id = substitution_node_type_id(&layout.compute_suffix, index);
    let (node_type, mapping) = substitution_node_type(template, &substitution, &node_type_id, ctx)?;
    ctx.global_substitution_template.add_node_type(node_type_id, node_type);
    substitution.topology_template.substitution_mappings = Some(mapping);

    debug!(
        template = %template.file_name(),
        substitution = %substitution.file_name(),
        inputs = substitution.topology_template.inputs.len(),
        outputs = substitution.topology_template.outputs.len(),
        "substitution template built"
    );
    Ok(Some(substitution))
}

fn index_input() -> ParameterDefinition {
    ParameterDefinition {
        parameter_type: Some(INTEGER_TYPE.to_string()),
        description: Some(INDEX_VALUE_DESCRIPTION.to_string()),
        required: Some(false),
        default: Some(Value::Int(0)),
        constraints: vec![Constraint { greater_or_equal: Some(Value::Int(0)), ..Default::default() }],
        ..Default::default()
    }
}

fn add_compute(
    template: &ServiceTemplate,
    substitution: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    ctx: &mut CompositionContext,
) -> Result<(), GraphError> {
    let computes = batch.iter().map(|d| d.compute()).collect::<Result<Vec<_>, _>>()?;
    let first = computes[0];
    let mut local = ctx.node_template_or_cleaned(template, first.node_template_id())?.clone();
    strip_outgoing_requirements(&mut local, &first.entity, Some(first), layout);

    let ids: Vec<&str> = computes.iter().map(|c| c.node_template_id()).collect();
    parameterize_properties(template, substitution, &mut local, &ids, layout, ctx)?;
    localize_requirements(&mut local, layout);

    if let Some(node_type) = template.node_type(&local.node_type) {
        substitution.add_node_type(local.node_type.clone(), node_type.clone());
    }
    let local_id = layout.compute_suffix.clone();
    substitution.add_node_template(local_id.clone(), local);
    record_local_ids(template, substitution, &ids, &local_id, ctx)
}

//ports sharing a local id (same slot across instances) collapse into one copy
fn add_ports(
    template: &ServiceTemplate,
    substitution: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    ctx: &mut CompositionContext,
) -> Result<(), GraphError> {
    let mut groups: BTreeMap<&str, Vec<&PortTemplateConsolidationData>> = BTreeMap::new();
    for port in batch.iter().flat_map(|d| d.ports.iter()) {
        let local_id = layout.expect_local_id(template, port.node_template_id())?;
        groups.entry(local_id).or_default().push(port);
    }

    for (local_id, ports) in groups {
        let first = ports[0];
        let mut local = ctx.node_template_or_cleaned(template, first.node_template_id())?.clone();
        strip_outgoing_requirements(&mut local, &first.entity, None, layout);

        let ids: Vec<&str> = ports.iter().map(|p| p.node_template_id()).collect();
        parameterize_properties(template, substitution, &mut local, &ids, layout, ctx)?;
        localize_requirements(&mut local, layout);

        substitution.add_node_template(local_id, local);
        record_local_ids(template, substitution, &ids, local_id, ctx)?;
    }
    Ok(())
}

fn record_local_ids(
    template: &ServiceTemplate,
    substitution: &ServiceTemplate,
    originals: &[&str],
    local_id: &str,
    ctx: &mut CompositionContext,
) -> Result<(), GraphError> {
    let (file_name, substitution_file) = (template.file_name(), substitution.file_name());
    for original in originals {
        ctx.set_substitution_local_id(&file_name, &substitution_file, original, local_id)?;
    }
    Ok(())
}

/// Rebuilds the properties of a local copy from every original it stands for.
///
/// Identical-value properties read one scalar `vm_<prop>_name` input. Properties
/// reading only batch peers keep their expression, re-pointed at the local
/// copies. Mixed ones are copied verbatim. Everything else reads this
/// instance's element of a list input.
fn parameterize_properties(
    template: &ServiceTemplate,
    substitution: &mut ServiceTemplate,
    local: &mut NodeTemplate,
    originals: &[&str],
    layout: &BatchLayout,
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    let flat_type = match ctx.flat_node_type(&local.node_type, &[&*substitution, template]) {
        Ok(node_type) => Some(node_type),
        Err(GraphError::NodeTypeNotFound(id)) => {
            debug!(node_type = %id, "node type unknown, list inputs fall back to json entries");
            None
        }
        Err(e) => return Err(e),
    };

    local.properties.clear();
    for original_id in originals {
        let original = ctx.node_template_or_cleaned(template, original_id)?;
        for (name, value) in &original.properties {
            match classify_property(name, value, layout, &ctx.config) {
                PropertyClass::IdenticalValue => {
                    let input_id = identical_value_input_id(name);
                    local.properties.insert(name.clone(), Value::get_input(input_id.clone()));
                    substitution.add_input(
                        input_id,
                        ParameterDefinition {
                            parameter_type: Some(STRING_TYPE.to_string()),
                            required: Some(true),
                            ..Default::default()
                        },
                    );
                }
                //first instance wins for values copied into the shared local node
                PropertyClass::LocalGetAttr(local_value) => {
                    local.properties.entry(name.clone()).or_insert(local_value);
                }
                PropertyClass::Unsupported => {
                    debug!(
                        node = original_id,
                        property = %name,
                        "property mixes batch and outside references, copied as is"
                    );
                    local.properties.entry(name.clone()).or_insert_with(|| value.clone());
                }
                PropertyClass::Parameterized => {
                    let Some(input_id) = layout.parameter_id(original_id, name) else {
                        continue;
                    };
                    let declared = flat_type
                        .as_ref()
                        .and_then(|t| t.properties.get(name))
                        .map(|p| p.property_type.as_str());
                    local.properties.insert(name.clone(), Value::get_input_indexed(input_id.clone()));
                    substitution.add_input(
                        input_id,
                        ParameterDefinition {
                            parameter_type: Some(LIST_TYPE.to_string()),
                            required: Some(true),
                            entry_schema: Some(EntrySchema::of(list_entry_type(declared))),
                            ..Default::default()
                        },
                    );
                }
            }
        }
    }
    Ok(())
}

fn add_outputs(
    template: &ServiceTemplate,
    substitution: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
) -> Result<(), GraphError> {
    for entity in batch.iter().flat_map(|d| d.flat_entities()) {
        let local_id = layout.expect_local_id(template, entity.node_template_id())?;
        let data = entity.entity();
        let from_nodes = data
            .nodes_get_attr_in
            .iter()
            .filter(|(source, _)| !layout.contains(source))
            .flat_map(|(_, funcs)| funcs);
        for func in from_nodes.chain(&data.output_parameters_get_attr_in) {
            add_output(substitution, local_id, &func.attribute_name);
        }
    }
    Ok(())
}

fn add_output(substitution: &mut ServiceTemplate, local_id: &str, attribute: &str) {
    substitution.add_output(
        substitution_output_parameter_id(local_id, attribute),
        ParameterDefinition {
            parameter_type: Some(LIST_TYPE.to_string()),
            entry_schema: Some(EntrySchema::of(STRING_TYPE)),
            value: Some(Value::get_attribute(local_id, attribute)),
            ..Default::default()
        },
    );
}

/// Node type of the substitution template plus the mappings binding it.
///
/// One property per input, one attribute per output. Capabilities and
/// requirements of every local node are exposed as `<id>_<localId>`, except
/// requirements the local node already fills up to their max occurrences.
fn substitution_node_type(
    template: &ServiceTemplate,
    substitution: &ServiceTemplate,
    node_type_id: &str,
    ctx: &CompositionContext,
) -> Result<(NodeType, SubstitutionMapping), GraphError> {
    let topology = &substitution.topology_template;
    let mut node_type = NodeType { derived_from: Some(VFC_ABSTRACT_SUBSTITUTE.to_string()), ..Default::default() };
    let mut mapping = SubstitutionMapping { node_type: node_type_id.to_string(), ..Default::default() };

    for (id, input) in &topology.inputs {
        node_type.properties.insert(
            id.clone(),
            PropertyDefinition {
                property_type: input.parameter_type.clone().unwrap_or_else(|| STRING_TYPE.to_string()),
                description: input.description.clone(),
                required: input.required,
                default: input.default.clone(),
                entry_schema: input.entry_schema.clone(),
            },
        );
    }
    for (id, output) in &topology.outputs {
        node_type.attributes.insert(
            id.clone(),
            AttributeDefinition {
                attribute_type: output.parameter_type.clone().unwrap_or_else(|| STRING_TYPE.to_string()),
                description: output.description.clone(),
                entry_schema: output.entry_schema.clone(),
            },
        );
    }

    for (local_id, node) in &topology.node_templates {
        let flat = match ctx.flat_node_type(&node.node_type, &[substitution, template]) {
            Ok(flat) => flat,
            Err(GraphError::NodeTypeNotFound(id)) => {
                debug!(node = %local_id, node_type = %id, "node type unknown, nothing exposed");
                continue;
            }
            Err(e) => return Err(e),
        };
        for (capability_id, definition) in flat.capabilities {
            let exposed = format!("{capability_id}_{local_id}");
            mapping.capabilities.insert(exposed.clone(), vec![local_id.clone(), capability_id]);
            node_type.capabilities.insert(exposed, definition);
        }
        for (requirement_id, definition) in flat.requirements.into_iter().flatten() {
            let filled = definition
                .max_occurrences()
                .is_some_and(|max| node.requirement_count(&requirement_id) as i64 >= max);
            if filled {
                continue;
            }
            let exposed = format!("{requirement_id}_{local_id}");
            mapping.requirements.insert(exposed.clone(), vec![local_id.clone(), requirement_id]);
            node_type.requirements.push(BTreeMap::from([(exposed, definition)]));
        }
    }
    Ok((node_type, mapping))
}
