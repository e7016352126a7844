// abstract node synthesizer: the one node template left in the original graph
// for a whole batch
use std::collections::BTreeMap;

use tracing::debug;

use crate::core::classify::BatchLayout;
use crate::core::consolidation::{ConsolidationEntity, UnifiedCompositionData};
use crate::core::context::CompositionContext;
use crate::core::graph::{GraphError, NodeTemplate, ServiceTemplate};
use crate::core::types::{
    abstract_node_template_id, identical_value_property_name, EntityKind, COUNT_PROPERTY_NAME,
    DIRECTIVE_SUBSTITUTABLE, INDEX_VALUE_PROPERTY_NAME, LIST_TYPE, MODELABLE_ENTITY_NAME_SELF,
    SERVICE_TEMPLATE_FILTER_PROPERTY_NAME, SUBSTITUTE_SERVICE_TEMPLATE_PROPERTY_NAME,
};
use crate::core::value::Value;

/// Adds the abstract node standing for `batch` to `template` and records the
/// original -> abstract mapping of every compute and port. Returns its id.
pub fn create_abstract_node(
    template: &mut ServiceTemplate,
    substitution: &ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    index: Option<usize>,
    ctx: &mut CompositionContext,
) -> Result<String, GraphError> {
    let node_type = substitution
        .substitution_node_type()
        .ok_or_else(|| GraphError::MissingSubstitutionMapping(substitution.file_name()))?;

    let mut node = NodeTemplate::new(node_type);
    node.directives.push(DIRECTIVE_SUBSTITUTABLE.to_string());
    node.properties = abstract_properties(template, substitution, batch, layout, ctx)?;

    let filter = BTreeMap::from([
        (
            SUBSTITUTE_SERVICE_TEMPLATE_PROPERTY_NAME.to_string(),
            Value::string(substitution.file_name()),
        ),
        (COUNT_PROPERTY_NAME.to_string(), Value::Int(batch.len() as i64)),
    ]);
    node.properties
        .insert(SERVICE_TEMPLATE_FILTER_PROPERTY_NAME.to_string(), Value::Map(filter));
    node.properties.insert(
        INDEX_VALUE_PROPERTY_NAME.to_string(),
        Value::get_property(vec![
            Value::string(MODELABLE_ENTITY_NAME_SELF),
            Value::string(SERVICE_TEMPLATE_FILTER_PROPERTY_NAME),
            Value::string(INDEX_VALUE_PROPERTY_NAME),
        ]),
    );

    let abstract_id = abstract_node_template_id(&layout.compute_suffix, index);
    let file_name = template.file_name();
    for entity in batch.iter().flat_map(|d| d.flat_entities()) {
        ctx.set_abstract_mapping(&file_name, entity.node_template_id(), &abstract_id)?;
    }
    template.add_node_template(abstract_id.clone(), node);
    Ok(abstract_id)
}

/// Property values of the abstract node, one per substitution input.
///
/// List inputs collect one value per instance in batch order, taken from the
/// original node the input was generated for (`Null` when the instance lacks
/// that node or the property). Identical-value inputs take the first compute's value.
fn abstract_properties(
    template: &ServiceTemplate,
    substitution: &ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    ctx: &CompositionContext,
) -> Result<BTreeMap<String, Value>, GraphError> {
    let first = batch.first().ok_or(GraphError::MissingCompute)?.compute()?;
    let first_compute = ctx.node_template_or_cleaned(template, first.node_template_id())?;
    let mut properties = BTreeMap::new();

    for (input_id, input) in &substitution.topology_template.inputs {
        if !input.is_type(LIST_TYPE) {
            let identical = identical_value_property_name(input_id)
                .filter(|p| ctx.config.is_identical_value_property(p));
            if let Some(value) = identical.and_then(|p| first_compute.properties.get(p)) {
                properties.insert(input_id.clone(), value.clone());
            }
            continue;
        }

        let mut values = Vec::with_capacity(batch.len());
        match EntityKind::from_input_name(input_id) {
            Some(EntityKind::Compute) => {
                let prefix = format!("compute_{}_", layout.compute_suffix);
                let Some(property) = input_id.strip_prefix(&prefix) else {
                    debug!(input = %input_id, "compute input of another type, skipped");
                    continue;
                };
                for data in batch {
                    let compute = ctx.node_template_or_cleaned(template, data.compute()?.node_template_id())?;
                    values.push(compute.properties.get(property).cloned().unwrap_or_default());
                }
            }
            Some(EntityKind::Port) => {
                let Some(key) = layout.port_key_of_input(input_id) else {
                    debug!(input = %input_id, "port input matches no port of the batch, skipped");
                    continue;
                };
                let property = &input_id[format!("port_{key}_").len()..];
                //one slot per instance, Null when the instance has no such port
                for data in batch {
                    let port = data.ports.iter().find(|p| layout.port_key(p.node_template_id()) == Some(key));
                    let value = match port {
                        Some(port) => ctx
                            .node_template_or_cleaned(template, port.node_template_id())?
                            .properties
                            .get(property)
                            .cloned()
                            .unwrap_or_default(),
                        None => Value::Null,
                    };
                    values.push(value);
                }
            }
            _ => {
                debug!(input = %input_id, "list input of unknown kind, skipped");
                continue;
            }
        }
        properties.insert(input_id.clone(), Value::List(values));
    }
    Ok(properties)
}
