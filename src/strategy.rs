/*
Inputs:

    main service template (mutated in place)

    optional nested service template (nested mode only)

    one batch of unified composition data sharing a compute type

    composition mode, resolved to a strategy through the config

Outputs:

    substitution templates, registered in the context

    abstract / unified nested node ids left in the main template

Responsibilities:

    Build, synthesize, rewire, clean, in that order, per batch

    Keep every id deterministic so reruns on a fresh context agree
*/

use std::slice;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StrategyKind;
use crate::core::classify::BatchLayout;
use crate::core::cleanup::{clean_node_types, clean_unified_entities, clean_unified_nested_entities};
use crate::core::connectivity::{update_composition_connectivity, update_nested_connectivity};
use crate::core::consolidation::{ConsolidationEntity, UnifiedCompositionData};
use crate::core::context::CompositionContext;
use crate::core::graph::{GraphError, ServiceTemplate};
use crate::substitution::abstract_node::create_abstract_node;
use crate::substitution::generator::create_substitution_template;
use crate::substitution::nested::handle_unified_nested_definition;

/// Composition mode requested by the consolidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompositionMode {
    SingleSubstitution,
    ScalingInstances,
    CatalogInstances,
    NestedSingleCompute,
}

/// What one call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositionOutcome {
    /// names of the substitution templates added to the context
    pub substitution_templates: Vec<String>,
    /// abstract node ids (or unified nested node ids) now in the main template
    pub abstract_node_ids: Vec<String>,
}

/// Consolidates `batch` in `main` according to `mode`.
///
/// An empty batch, or a mode the config maps to no strategy, is a no-op.
pub fn create_unified_composition(
    main: &mut ServiceTemplate,
    nested: Option<&mut ServiceTemplate>,
    batch: &[UnifiedCompositionData],
    mode: CompositionMode,
    ctx: &mut CompositionContext,
) -> Result<CompositionOutcome, GraphError> {
    if batch.is_empty() {
        debug!(template = %main.file_name(), ?mode, "empty batch, nothing to compose");
        return Ok(CompositionOutcome::default());
    }
    let Some(strategy) = ctx.config.strategy_for(mode) else {
        debug!(?mode, "no strategy configured for mode");
        return Ok(CompositionOutcome::default());
    };

    let mut outcome = CompositionOutcome::default();
    match strategy {
        StrategyKind::SingleSubstitution => {
            let indexed = batch.len() > 1;
            for (i, data) in batch.iter().enumerate() {
                let index = indexed.then_some(i);
                compose_batch(main, slice::from_ref(data), index, mode, ctx, &mut outcome)?;
            }
            clean_node_types(main, batch, ctx);
        }
        StrategyKind::ScalingInstances => {
            compose_batch(main, batch, None, mode, ctx, &mut outcome)?;
            clean_node_types(main, batch, ctx);
        }
        StrategyKind::NestedSingleCompute => {
            let nested = nested.ok_or_else(|| GraphError::MissingNestedTemplate(main.file_name()))?;
            compose_nested(main, nested, batch, ctx, &mut outcome)?;
        }
    }
    Ok(outcome)
}

fn compose_batch(
    main: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    index: Option<usize>,
    mode: CompositionMode,
    ctx: &mut CompositionContext,
    outcome: &mut CompositionOutcome,
) -> Result<(), GraphError> {
    let layout = BatchLayout::new(main, ctx, batch)?;
    let Some(substitution) = create_substitution_template(main, batch, &layout, index, ctx)? else {
        return Ok(());
    };
    let abstract_id = create_abstract_node(main, &substitution, batch, &layout, index, ctx)?;
    update_composition_connectivity(main, batch, &layout, ctx)?;
    clean_unified_entities(main, batch, ctx);

    info!(
        template = %main.file_name(),
        ?mode,
        substitution = %substitution.name(),
        abstract_node = %abstract_id,
        instances = batch.len(),
        "unified composition created"
    );
    outcome.substitution_templates.push(substitution.name().to_string());
    outcome.abstract_node_ids.push(abstract_id);
    ctx.add_translated_template(substitution);
    Ok(())
}

fn compose_nested(
    main: &mut ServiceTemplate,
    nested: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &mut CompositionContext,
    outcome: &mut CompositionOutcome,
) -> Result<(), GraphError> {
    let file_name = main.file_name();
    for data in batch {
        let entry = slice::from_ref(data);
        handle_unified_nested_definition(main, nested, entry, ctx)?;
        update_nested_connectivity(main, entry, ctx)?;
        clean_unified_nested_entities(main, entry, ctx);

        if let Some(node) = &data.nested {
            if let Some(new_id) = ctx.nested_node_id(&file_name, node.node_template_id()) {
                info!(template = %file_name, nested = %nested.file_name(), node = %new_id, "unified nested node");
                outcome.abstract_node_ids.push(new_id.to_string());
            }
        }
    }
    Ok(())
}
