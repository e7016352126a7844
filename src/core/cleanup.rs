// removal of consolidated nodes and of the node types they leave unused
use std::collections::BTreeSet;

use tracing::debug;

use crate::core::consolidation::{ConsolidationEntity, UnifiedCompositionData};
use crate::core::context::CompositionContext;
use crate::core::graph::ServiceTemplate;
use crate::core::types::HEAT_STACK_GROUP_TYPE;

/// Swaps `old` for `new` in every heat stack group. Returns how many groups changed.
pub fn update_heat_stack_groups(template: &mut ServiceTemplate, old: &str, new: &str) -> usize {
    template
        .topology_template
        .groups
        .values_mut()
        .filter(|g| g.group_type == HEAT_STACK_GROUP_TYPE)
        .map(|g| g.replace_member(old, new))
        .filter(|changed| *changed)
        .count()
}

/// Removes every compute and port of the batch from `template`.
///
/// Removed nodes go to the cleaned cache so later passes can still read their
/// type and properties. Heat stack groups still listing them get the abstract
/// node instead.
pub fn clean_unified_entities(
    template: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &mut CompositionContext,
) {
    let file_name = template.file_name();
    for data in batch {
        for entity in data.flat_entities() {
            let id = entity.node_template_id();
            let abstract_id = ctx.abstract_node_id(&file_name, id).map(str::to_string);
            match template.remove_node_template(id) {
                Some(removed) => ctx.cache_cleaned_node(&file_name, id, entity.kind(), removed),
                None => debug!(template = %file_name, node = id, "node already removed"),
            }
            if let Some(abstract_id) = abstract_id {
                update_heat_stack_groups(template, id, &abstract_id);
            }
        }
    }
}

/// Drops the node types of the batch's cleaned computes and ports, as long as no
/// remaining node template uses them and no remaining node type derives from them.
pub fn clean_node_types(template: &mut ServiceTemplate, batch: &[UnifiedCompositionData], ctx: &CompositionContext) {
    let file_name = template.file_name();
    let types: BTreeSet<String> = batch
        .iter()
        .flat_map(|d| d.flat_entities())
        .filter_map(|e| ctx.cleaned_node(&file_name, e.node_template_id()))
        .map(|n| n.node_type.clone())
        .collect();

    for node_type in types {
        if template.is_node_type_in_use(&node_type) {
            continue;
        }
        let derived = template
            .node_types
            .values()
            .any(|t| t.derived_from.as_deref() == Some(node_type.as_str()));
        if derived {
            continue;
        }
        if template.node_types.remove(&node_type).is_some() {
            debug!(template = %file_name, node_type = %node_type, "removed unused node type");
        }
    }
}

/// Heat stack groups of unified nested nodes get the new nested id.
pub fn clean_unified_nested_entities(
    template: &mut ServiceTemplate,
    batch: &[UnifiedCompositionData],
    ctx: &CompositionContext,
) {
    let file_name = template.file_name();
    for nested in batch.iter().filter_map(|d| d.nested.as_ref()) {
        let original = nested.node_template_id();
        if let Some(new_id) = ctx.nested_node_id(&file_name, original) {
            update_heat_stack_groups(template, original, new_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositionConfig;
    use crate::core::consolidation::{
        ComputeTemplateConsolidationData, ConsolidationData, NestedTemplateConsolidationData,
        PortTemplateConsolidationData,
    };
    use crate::core::graph::{GroupDefinition, NodeTemplate, NodeType};
    use crate::core::types::EntityKind;

    const FSB_TYPE: &str = "org.openecomp.resource.vfc.nodes.heat.vFSB";

    fn mk_ctx() -> CompositionContext {
        CompositionContext::new(CompositionConfig::default(), ConsolidationData::default())
    }

    fn mk_group(group_type: &str, members: &[&str]) -> GroupDefinition {
        GroupDefinition {
            group_type: group_type.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    fn mk_batch() -> Vec<UnifiedCompositionData> {
        let mut data = UnifiedCompositionData::with_compute(ComputeTemplateConsolidationData::new("FSB1"));
        data.ports.push(PortTemplateConsolidationData::new("FSB1_ctrl"));
        vec![data]
    }

    #[test]
    fn clean_removes_and_caches() {
        let mut st = ServiceTemplate::new("Main");
        let file = st.file_name();
        st.add_node_template("FSB1", NodeTemplate::new(FSB_TYPE));
        st.add_node_template("FSB1_ctrl", NodeTemplate::new("port"));
        st.add_node_template("abstract_vFSB", NodeTemplate::new("abstract.vFSB"));
        st.topology_template
            .groups
            .insert("stack".into(), mk_group(HEAT_STACK_GROUP_TYPE, &["FSB1", "FSB1_ctrl"]));
        st.topology_template
            .groups
            .insert("other".into(), mk_group("tosca.groups.Root", &["FSB1"]));

        let mut ctx = mk_ctx();
        ctx.set_abstract_mapping(&file, "FSB1", "abstract_vFSB").unwrap();
        ctx.set_abstract_mapping(&file, "FSB1_ctrl", "abstract_vFSB").unwrap();

        clean_unified_entities(&mut st, &mk_batch(), &mut ctx);

        assert!(st.node_template("FSB1").is_none());
        assert!(st.node_template("FSB1_ctrl").is_none());
        assert_eq!(ctx.cleaned_kind(&file, "FSB1"), Some(EntityKind::Compute));
        assert_eq!(ctx.cleaned_kind(&file, "FSB1_ctrl"), Some(EntityKind::Port));
        assert_eq!(st.topology_template.groups["stack"].members, vec!["abstract_vFSB"]);
        //only heat stacks are touched here
        assert_eq!(st.topology_template.groups["other"].members, vec!["FSB1"]);

        //second run is harmless
        clean_unified_entities(&mut st, &mk_batch(), &mut ctx);
        assert_eq!(ctx.cleaned_node(&file, "FSB1").unwrap().node_type, FSB_TYPE);
    }

    #[test]
    fn node_types_go_only_when_unused() {
        let mut st = ServiceTemplate::new("Main");
        let file = st.file_name();
        st.add_node_type(FSB_TYPE, NodeType::default());
        st.add_node_type("port", NodeType::default());
        st.add_node_type("child", NodeType { derived_from: Some("port".into()), ..Default::default() });

        let mut ctx = mk_ctx();
        ctx.cache_cleaned_node(&file, "FSB1", EntityKind::Compute, NodeTemplate::new(FSB_TYPE));
        ctx.cache_cleaned_node(&file, "FSB1_ctrl", EntityKind::Port, NodeTemplate::new("port"));

        //another FSB still lives
        st.add_node_template("FSB2", NodeTemplate::new(FSB_TYPE));
        clean_node_types(&mut st, &mk_batch(), &ctx);
        assert!(st.node_type(FSB_TYPE).is_some());
        //derived from
        assert!(st.node_type("port").is_some());

        st.remove_node_template("FSB2");
        clean_node_types(&mut st, &mk_batch(), &ctx);
        assert!(st.node_type(FSB_TYPE).is_none());
    }

    #[test]
    fn nested_groups_get_new_id() {
        let mut st = ServiceTemplate::new("Main");
        let file = st.file_name();
        st.topology_template
            .groups
            .insert("stack".into(), mk_group(HEAT_STACK_GROUP_TYPE, &["pcm", "lb"]));
        let mut ctx = mk_ctx();
        ctx.set_nested_node_mapping(&file, "pcm", "abstract_pcm_0").unwrap();

        let batch = vec![UnifiedCompositionData::with_nested(NestedTemplateConsolidationData::new("pcm"))];
        clean_unified_nested_entities(&mut st, &batch, &ctx);

        assert_eq!(st.topology_template.groups["stack"].members, vec!["lb", "abstract_pcm_0"]);
    }
}
