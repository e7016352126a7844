// original id -> new id mappings recorded while composing + the mapping report
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::context::CompositionContext;
use crate::core::graph::GraphError;
use crate::core::types::EntityKind;

//store a mapping, refusing silent overwrites:
//1. an original node maps to at most one new id per map.
//2. many originals may map to the same new id (a whole batch -> one abstract node).
//3. re-recording the identical mapping is a no-op, a different target is an error.
fn set_unique(
    map: &mut BTreeMap<String, String>,
    node: &str,
    new: &str,
) -> Result<(), GraphError> {
    match map.get(node) {
        None => {
            map.insert(node.to_string(), new.to_string());
            Ok(())
        }
        Some(old) if old == new => Ok(()), //idempotent
        Some(old) => Err(GraphError::MappingAlreadyExists {
            node: node.to_string(),
            old: old.clone(),
            new: new.to_string(),
        }),
    }
}

impl CompositionContext {
    pub fn set_abstract_mapping(
        &mut self,
        file_name: &str,
        original: &str,
        abstract_id: &str,
    ) -> Result<(), GraphError> {
        set_unique(&mut self.file_data_mut(file_name).abstract_ids, original, abstract_id)
    }

    /// Abstract node now standing in for `original`, if it was consolidated.
    pub fn abstract_node_id(&self, file_name: &str, original: &str) -> Option<&str> {
        self.file_data(file_name)?
            .abstract_ids
            .get(original)
            .map(String::as_str)
    }

    /// Distinct abstract node ids created in a file.
    pub fn abstract_node_ids(&self, file_name: &str) -> BTreeSet<String> {
        self.file_data(file_name)
            .map(|d| d.abstract_ids.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Records where an original node of `file_name` lives inside a substitution template.
    pub fn set_substitution_local_id(
        &mut self,
        file_name: &str,
        substitution_file: &str,
        original: &str,
        local_id: &str,
    ) -> Result<(), GraphError> {
        set_unique(&mut self.file_data_mut(substitution_file).local_ids, original, local_id)?;
        set_unique(&mut self.file_data_mut(file_name).absorbed_local_ids, original, local_id)
    }

    pub fn substitution_local_id(&self, substitution_file: &str, original: &str) -> Option<&str> {
        self.file_data(substitution_file)?
            .local_ids
            .get(original)
            .map(String::as_str)
    }

    /// Local id the substitution template absorbing `original` gave it.
    pub fn absorbed_local_id(&self, file_name: &str, original: &str) -> Option<&str> {
        self.file_data(file_name)?
            .absorbed_local_ids
            .get(original)
            .map(String::as_str)
    }

    pub fn set_nested_node_mapping(
        &mut self,
        file_name: &str,
        original: &str,
        new_id: &str,
    ) -> Result<(), GraphError> {
        set_unique(&mut self.file_data_mut(file_name).nested_node_ids, original, new_id)
    }

    pub fn nested_node_id(&self, file_name: &str, original: &str) -> Option<&str> {
        self.file_data(file_name)?
            .nested_node_ids
            .get(original)
            .map(String::as_str)
    }

    pub fn nested_node_ids(&self, file_name: &str) -> BTreeSet<String> {
        self.file_data(file_name)
            .map(|d| d.nested_node_ids.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_nested_type_mapping(&mut self, original: &str, new_type: &str) -> Result<(), GraphError> {
        set_unique(&mut self.nested_type_ids, original, new_type)
    }

    pub fn nested_type_id(&self, original: &str) -> Option<&str> {
        self.nested_type_ids.get(original).map(String::as_str)
    }

    /// TOON rendering of every id mapping recorded for one template file.
    pub fn mapping_report(&self, file_name: &str) -> Result<String, GraphError> {
        let mut report = MappingReport { template: file_name, ..Default::default() };
        if let Some(data) = self.file_data(file_name) {
            report.abstract_nodes = rows(&data.abstract_ids);
            report.local_nodes = rows(&data.local_ids);
            report.absorbed_nodes = rows(&data.absorbed_local_ids);
            report.nested_nodes = rows(&data.nested_node_ids);
            report.cleaned = data
                .cleaned
                .iter()
                .map(|(node, (kind, template))| CleanedRow {
                    node,
                    kind: *kind,
                    node_type: &template.node_type,
                })
                .collect();
        }
        toon_format::encode_default(&report).map_err(|e| GraphError::Report(e.to_string()))
    }
}

#[derive(Debug, Default, Serialize)]
struct MappingReport<'a> {
    template: &'a str,
    abstract_nodes: Vec<MappingRow<'a>>,
    local_nodes: Vec<MappingRow<'a>>,
    absorbed_nodes: Vec<MappingRow<'a>>,
    nested_nodes: Vec<MappingRow<'a>>,
    cleaned: Vec<CleanedRow<'a>>,
}

#[derive(Debug, Serialize)]
struct MappingRow<'a> {
    original: &'a str,
    new: &'a str,
}

#[derive(Debug, Serialize)]
struct CleanedRow<'a> {
    node: &'a str,
    kind: EntityKind,
    node_type: &'a str,
}

fn rows(map: &BTreeMap<String, String>) -> Vec<MappingRow<'_>> {
    map.iter()
        .map(|(original, new)| MappingRow { original, new })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositionConfig;
    use crate::core::consolidation::ConsolidationData;
    use crate::core::graph::NodeTemplate;

    const MAIN: &str = "MainServiceTemplate.yaml";

    fn mk_ctx() -> CompositionContext {
        CompositionContext::new(CompositionConfig::default(), ConsolidationData::default())
    }

    #[test]
    fn mapping_insert_and_lookup_and_unmapped_none() {
        let mut ctx = mk_ctx();

        ctx.set_abstract_mapping(MAIN, "FSB1", "abstract_vFSB").unwrap();
        ctx.set_abstract_mapping(MAIN, "FSB1_ctrl", "abstract_vFSB").unwrap();

        assert_eq!(ctx.abstract_node_id(MAIN, "FSB1"), Some("abstract_vFSB"));
        assert_eq!(ctx.abstract_node_id(MAIN, "FSB2"), None);
        assert_eq!(ctx.abstract_node_id("OtherServiceTemplate.yaml", "FSB1"), None);

        assert_eq!(ctx.abstract_node_id(MAIN, "FSB1_ctrl"), Some("abstract_vFSB"));
        assert_eq!(ctx.abstract_node_ids(MAIN).len(), 1);
    }

    #[test]
    fn mapping_rejects_overwrite() {
        let mut ctx = mk_ctx();

        ctx.set_abstract_mapping(MAIN, "FSB1", "abstract_vFSB_0").unwrap();
        //same mapping again is fine
        ctx.set_abstract_mapping(MAIN, "FSB1", "abstract_vFSB_0").unwrap();

        let err = ctx.set_abstract_mapping(MAIN, "FSB1", "abstract_vFSB_1").unwrap_err();
        match err {
            GraphError::MappingAlreadyExists { node, old, new } => {
                assert_eq!(node, "FSB1");
                assert_eq!(old, "abstract_vFSB_0");
                assert_eq!(new, "abstract_vFSB_1");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn nested_and_local_maps_are_separate() {
        let mut ctx = mk_ctx();
        ctx.set_substitution_local_id(MAIN, "Nested_vFSBServiceTemplate.yaml", "FSB1", "vFSB").unwrap();
        ctx.set_nested_node_mapping(MAIN, "pcm", "abstract_pcm_0").unwrap();
        ctx.set_nested_type_mapping("heat.nested-pcm", "org.openecomp.resource.abstract.nodes.heat.pcm")
            .unwrap();

        assert_eq!(ctx.substitution_local_id("Nested_vFSBServiceTemplate.yaml", "FSB1"), Some("vFSB"));
        assert_eq!(ctx.substitution_local_id(MAIN, "FSB1"), None);
        assert_eq!(ctx.absorbed_local_id(MAIN, "FSB1"), Some("vFSB"));
        assert_eq!(ctx.nested_node_id(MAIN, "pcm"), Some("abstract_pcm_0"));
        assert_eq!(ctx.abstract_node_id(MAIN, "pcm"), None);
        assert!(ctx.nested_node_ids(MAIN).contains("abstract_pcm_0"));
        assert_eq!(
            ctx.nested_type_id("heat.nested-pcm"),
            Some("org.openecomp.resource.abstract.nodes.heat.pcm")
        );
    }

    #[test]
    fn report_lists_mappings() {
        let mut ctx = mk_ctx();
        ctx.set_abstract_mapping(MAIN, "FSB1", "abstract_vFSB").unwrap();
        ctx.cache_cleaned_node(MAIN, "FSB1", EntityKind::Compute, NodeTemplate::new("vfc.vFSB"));

        let report = ctx.mapping_report(MAIN).unwrap();
        assert!(report.contains("abstract_vFSB"));
        assert!(report.contains("FSB1"));
        assert!(report.contains("compute"));
    }
}
