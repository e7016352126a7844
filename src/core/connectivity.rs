// requirement rewiring: connected-out, connected-in, volumes, groups.
// get_attr rewiring lives in propagate.rs, both are driven from here.
use std::collections::BTreeMap;

use tracing::debug;

use crate::core::classify::BatchLayout;
use crate::core::consolidation::{
    ComputeTemplateConsolidationData, ConsolidationEntity, EntityConsolidationData, RequirementAssignmentData,
    UnifiedCompositionData,
};
use crate::core::context::CompositionContext;
use crate::core::graph::{GraphError, NodeTemplate, RequirementAssignment, ServiceTemplate};
use crate::core::propagate::{cleaned_node_local_id, update_get_attr_connectivity, update_nested_get_attr_connectivity};
use crate::core::types::{INSTANCE_UUID_PROPERTY_NAME, VOLUME_ATTACHES_TO_RELATIONSHIP_TYPE};
use crate::core::value::Value;

/// Rewires everything outside the batch that pointed at its nodes.
///
/// Steps:
/// 1) output parameter get_attr
/// 2) node property get_attr
/// 3) connected-out requirements -> abstract node
/// 4) connected-in requirements -> abstract node capabilities
/// 5) volume requirements -> abstract node
/// 6) group membership
pub fn update_composition_connectivity(
    template: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    layout: &BatchLayout,
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    update_get_attr_connectivity(template, batch, layout, ctx)?;

    let entities: Vec<&dyn ConsolidationEntity> = batch.iter().flat_map(|d| d.flat_entities()).collect();
    for entity in &entities {
        let data = entity.entity();
        add_requirements_to_abstract_node(template, ctx, layout, &data.node_template_id, &data.nodes_connected_out)?;
    }
    for entity in &entities {
        update_connected_in(template, ctx, layout, entity.entity())?;
    }
    for data in batch {
        let compute = data.compute()?;
        add_requirements_to_abstract_node(template, ctx, layout, compute.node_template_id(), &compute.volumes)?;
    }
    update_groups(template, &entities, ctx);
    Ok(())
}

/// Nested counterpart: connected-in, then get_attr. Only node ids change.
pub fn update_nested_connectivity(
    template: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &CompositionContext,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    for nested in batch.iter().filter_map(|d| d.nested.as_ref()) {
        let original = nested.node_template_id();
        let Some(new_id) = ctx.nested_node_id(&file_name, original) else {
            continue;
        };
        for (source_id, requirements) in &nested.entity.nodes_connected_in {
            for req in requirements.iter().filter(|r| r.requirement.node == original) {
                let mut rewritten = req.requirement.clone();
                rewritten.node = new_id.to_string();
                let Some(source) = template.node_template_mut(source_id) else {
                    if ctx.cleaned_node(&file_name, source_id).is_some() {
                        debug!(source = %source_id, "connected-in source already cleaned");
                        continue;
                    }
                    return Err(GraphError::NodeTemplateNotFound {
                        template: file_name,
                        node: source_id.clone(),
                    });
                };
                replace_requirement(source, &req.requirement_id, &req.requirement, rewritten);
            }
        }
    }
    update_nested_get_attr_connectivity(template, batch, ctx)
}

//connected-out and volumes share this: each original requirement is re-added on
//the abstract node as `<reqId>_<localId>`
fn add_requirements_to_abstract_node(
    template: &mut ServiceTemplate,
    ctx: &CompositionContext,
    layout: &BatchLayout,
    entity_id: &str,
    requirements: &BTreeMap<String, Vec<RequirementAssignmentData>>,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    let Some(abstract_id) = ctx.abstract_node_id(&file_name, entity_id) else {
        debug!(node = entity_id, "no abstract node recorded, requirements not moved");
        return Ok(());
    };
    let local_id = layout.expect_local_id(template, entity_id)?.to_string();

    let mut moved = Vec::new();
    for (target_id, list) in requirements {
        //batch-internal, the local copies keep it
        if layout.contains(target_id) {
            continue;
        }
        //a target consolidated by an earlier batch is reached through its abstract node
        let redirect = ctx
            .abstract_node_id(&file_name, target_id)
            .map(|target_abstract| (target_abstract, cleaned_node_local_id(ctx, &file_name, target_id)));
        for req in list {
            let mut rewritten = req.requirement.clone();
            if let Some((target_abstract, target_local)) = &redirect {
                rewritten.node = target_abstract.to_string();
                let capability = target_local.as_deref().and_then(|local| {
                    exposed_capability(template, ctx, target_abstract, &req.requirement.capability, local)
                });
                match capability {
                    Some(capability) => rewritten.capability = capability,
                    None => debug!(target = %target_id, capability = %req.requirement.capability, "no exposed capability found"),
                }
            }
            moved.push((format!("{}_{local_id}", req.requirement_id), rewritten));
        }
    }

    let Some(abstract_node) = template.node_template_mut(abstract_id) else {
        debug!(node = abstract_id, "abstract node template missing, requirements not moved");
        return Ok(());
    };
    let mut relationships = Vec::new();
    for (requirement_id, requirement) in moved {
        if abstract_node.has_requirement(&requirement_id, &requirement) {
            continue;
        }
        if let Some(relationship) = &requirement.relationship {
            relationships.push(relationship.clone());
        }
        abstract_node.add_requirement(requirement_id, requirement);
    }
    for relationship in relationships {
        update_volume_relationship(template, ctx, &relationship);
    }
    Ok(())
}

/// Capability of the abstract node's substitution type with type `capability_type`
/// exposed from the local node `local_id`.
pub fn exposed_capability(
    template: &ServiceTemplate,
    ctx: &CompositionContext,
    abstract_id: &str,
    capability_type: &str,
    local_id: &str,
) -> Option<String> {
    let node_type_id = &template.node_template(abstract_id)?.node_type;
    let node_type = ctx.global_substitution_template.node_type(node_type_id)?;
    node_type
        .capabilities
        .iter()
        .find(|(id, def)| def.capability_type == capability_type && id.ends_with(local_id))
        .map(|(id, _)| id.clone())
}

//the attachment's instance_uuid named the compute, now it names the abstract node
fn update_volume_relationship(template: &mut ServiceTemplate, ctx: &CompositionContext, relationship_id: &str) {
    let file_name = template.file_name();
    let Some(relationship) = template.topology_template.relationship_templates.get_mut(relationship_id) else {
        return;
    };
    if relationship.relationship_type != VOLUME_ATTACHES_TO_RELATIONSHIP_TYPE {
        return;
    }
    if let Some(Value::String(instance)) = relationship.properties.get_mut(INSTANCE_UUID_PROPERTY_NAME) {
        if let Some(abstract_id) = ctx.abstract_node_id(&file_name, instance) {
            *instance = abstract_id.to_string();
        }
    }
}

/// Points every requirement held towards `entity` at the abstract node.
///
/// The holder is the source node itself, or, when the source was consolidated
/// by an earlier batch, the requirement its abstract node inherited.
fn update_connected_in(
    template: &mut ServiceTemplate,
    ctx: &CompositionContext,
    layout: &BatchLayout,
    entity: &EntityConsolidationData,
) -> Result<(), GraphError> {
    let file_name = template.file_name();
    let entity_id = entity.node_template_id.as_str();
    let Some(abstract_id) = ctx.abstract_node_id(&file_name, entity_id) else {
        debug!(node = entity_id, "no abstract node recorded, connected-in left as is");
        return Ok(());
    };
    let local_id = layout.expect_local_id(template, entity_id)?;

    for (source_id, requirements) in &entity.nodes_connected_in {
        //sources in the batch are removed with it, their local copies are localized
        if layout.contains(source_id) {
            continue;
        }
        for req in requirements.iter().filter(|r| r.requirement.node == entity_id) {
            let Some(capability) =
                exposed_capability(template, ctx, abstract_id, &req.requirement.capability, local_id)
            else {
                debug!(
                    source = %source_id,
                    node = entity_id,
                    capability = %req.requirement.capability,
                    "no exposed capability found, connected-in requirement left unresolved"
                );
                continue;
            };
            let rewritten = RequirementAssignment {
                capability,
                node: abstract_id.to_string(),
                relationship: req.requirement.relationship.clone(),
            };

            let (holder_id, requirement_id) = match template.node_template(source_id) {
                Some(_) => (source_id.clone(), req.requirement_id.clone()),
                None => match (
                    ctx.abstract_node_id(&file_name, source_id),
                    cleaned_node_local_id(ctx, &file_name, source_id),
                ) {
                    (Some(source_abstract), Some(source_local)) => {
                        (source_abstract.to_string(), format!("{}_{source_local}", req.requirement_id))
                    }
                    _ if ctx.cleaned_node(&file_name, source_id).is_some() => {
                        debug!(source = %source_id, "connected-in source already cleaned");
                        continue;
                    }
                    _ => {
                        return Err(GraphError::NodeTemplateNotFound {
                            template: file_name,
                            node: source_id.clone(),
                        });
                    }
                },
            };
            let holder = template.expect_node_template_mut(&holder_id)?;
            replace_requirement(holder, &requirement_id, &req.requirement, rewritten);
        }
    }
    Ok(())
}

//swap `original` for `rewritten` under `requirement_id`. when the rewritten one
//is already there the original is dropped instead of duplicated.
fn replace_requirement(
    holder: &mut NodeTemplate,
    requirement_id: &str,
    original: &RequirementAssignment,
    rewritten: RequirementAssignment,
) {
    if holder.has_requirement(requirement_id, &rewritten) {
        holder.remove_requirement(requirement_id, original);
        return;
    }
    match holder.requirement_mut(requirement_id, original) {
        Some(slot) => *slot = rewritten,
        None => debug!(requirement = requirement_id, "requirement no longer present"),
    }
}

fn update_groups(template: &mut ServiceTemplate, entities: &[&dyn ConsolidationEntity], ctx: &CompositionContext) {
    let file_name = template.file_name();
    for entity in entities {
        let data = entity.entity();
        let Some(abstract_id) = ctx.abstract_node_id(&file_name, &data.node_template_id) else {
            continue;
        };
        for group_id in &data.group_ids {
            match template.topology_template.groups.get_mut(group_id) {
                Some(group) => {
                    group.replace_member(&data.node_template_id, abstract_id);
                }
                None => debug!(group = %group_id, "group not found"),
            }
        }
    }
}

/// Drops the requirements that leave the batch (connected-out, and volumes for
/// a compute) from a node about to be copied into a substitution template.
/// Requirements towards batch peers stay and are localized afterwards.
pub fn strip_outgoing_requirements(
    node: &mut NodeTemplate,
    entity: &EntityConsolidationData,
    compute: Option<&ComputeTemplateConsolidationData>,
    layout: &BatchLayout,
) {
    let outgoing = entity
        .nodes_connected_out
        .iter()
        .chain(compute.into_iter().flat_map(|c| c.volumes.iter()))
        .filter(|(target_id, _)| !layout.contains(target_id))
        .flat_map(|(_, list)| list);
    for req in outgoing {
        node.remove_requirement(&req.requirement_id, &req.requirement);
    }
}

/// Re-points requirements of a local copy at the local ids of their batch peers.
pub fn localize_requirements(node: &mut NodeTemplate, layout: &BatchLayout) {
    for entry in node.requirements.iter_mut().flatten() {
        for requirement in entry.values_mut() {
            if let Some(local_id) = layout.local_id(&requirement.node) {
                requirement.node = local_id.to_string();
            }
        }
    }
}
