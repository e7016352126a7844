// nested-definition unifier: nested sub-templates reused across files get one
// namespaced node type and per-main-template indexed node ids
use tracing::{debug, info};

use crate::core::consolidation::{ConsolidationEntity, UnifiedCompositionData};
use crate::core::context::CompositionContext;
use crate::core::graph::{GraphError, ServiceTemplate};
use crate::core::types::{
    abstract_node_template_id, namespace_suffix, nested_node_type_id, with_index, VFC_ABSTRACT_SUBSTITUTE,
};

/// Unifies the node type of `nested` and re-keys the batch's nested node
/// templates of `main` to it.
pub fn handle_unified_nested_definition(
    main: &mut ServiceTemplate,
    nested: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &mut CompositionContext,
) -> Result<(), GraphError> {
    handle_unified_nested_node_type(main, nested, ctx)?;
    update_unified_nested_templates(main, batch, ctx)
}

/// Steps:
/// 1) read the nested template's current type from its substitution mapping
/// 2) derive the new type from the first compute type the nested file holds
/// 3) nothing more when this (main, nested) pair was handled already
/// 4) a nested file unified for another main template keeps that type, only
///    its mapping is re-pointed
/// 5) otherwise move the type in the global substitution template under its
///    indexed id and re-point the mapping
fn handle_unified_nested_node_type(
    main: &ServiceTemplate,
    nested: &mut ServiceTemplate,
    ctx: &mut CompositionContext,
) -> Result<(), GraphError> {
    let nested_file = nested.file_name();
    let original_type = nested
        .substitution_node_type()
        .ok_or_else(|| GraphError::MissingSubstitutionMapping(nested_file.clone()))?
        .to_string();

    let compute_type = ctx
        .consolidation_data
        .file(&nested_file)
        .and_then(|f| f.compute_types().next())
        .map(str::to_string);
    let Some(compute_type) = compute_type else {
        debug!(template = %nested_file, "no compute inside nested template, type left as is");
        return Ok(());
    };
    let new_type = nested_node_type_id(namespace_suffix(&compute_type));

    let main_file = main.file_name();
    if ctx.is_nested_template_handled(&main_file, &nested_file) {
        return Ok(());
    }
    if let Some(unified) = ctx.unified_nested_type(&nested_file).map(str::to_string) {
        if original_type != unified {
            ctx.set_nested_type_mapping(&original_type, &unified)?;
        }
        if let Some(mapping) = nested.topology_template.substitution_mappings.as_mut() {
            mapping.node_type = unified.clone();
        }
        ctx.mark_nested_template_handled(&main_file, &nested_file, &unified);
        debug!(template = %nested_file, main = %main_file, node_type = %unified, "nested type reused");
        return Ok(());
    }

    let idx = ctx.global_type_index(&main_file, &new_type);
    let indexed_type = with_index(new_type, (idx > 0).then_some(idx));

    match ctx.global_substitution_template.node_types.remove(&original_type) {
        Some(mut node_type) => {
            node_type.derived_from = Some(VFC_ABSTRACT_SUBSTITUTE.to_string());
            ctx.global_substitution_template.add_node_type(indexed_type.clone(), node_type);
        }
        None => debug!(node_type = %original_type, "nested type not in global substitution template"),
    }
    ctx.set_nested_type_mapping(&original_type, &indexed_type)?;
    if let Some(mapping) = nested.topology_template.substitution_mappings.as_mut() {
        mapping.node_type = indexed_type.clone();
    }
    ctx.mark_nested_template_handled(&main_file, &nested_file, &indexed_type);
    info!(template = %nested_file, from = %original_type, to = %indexed_type, "unified nested node type");
    Ok(())
}

/// Gives every nested node of the batch still present in `main` its unified
/// type and an id `abstract_<suffix>_<n>`, `n` counting per (main, type).
pub fn update_unified_nested_templates(
    main: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &mut CompositionContext,
) -> Result<(), GraphError> {
    let main_file = main.file_name();
    for nested in batch.iter().filter_map(|d| d.nested.as_ref()) {
        let original = nested.node_template_id();
        let Some(node) = main.node_template(original) else {
            debug!(template = %main_file, node = original, "nested node not in main template");
            continue;
        };
        let Some(new_type) = ctx.nested_type_id(&node.node_type).map(str::to_string) else {
            debug!(node = original, node_type = %node.node_type, "nested type was not unified");
            continue;
        };

        let idx = ctx.next_nested_node_index(&main_file, &new_type);
        let new_id = abstract_node_template_id(namespace_suffix(&new_type), Some(idx));
        if let Some(mut node) = main.remove_node_template(original) {
            node.node_type = new_type;
            main.add_node_template(new_id.clone(), node);
        }
        ctx.set_nested_node_mapping(&main_file, original, &new_id)?;
    }
    Ok(())
}
